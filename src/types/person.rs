use crate::error::{Error, Result};

/// author/committer/tagger identity with timestamp and timezone
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub email: String,
    /// unix timestamp, seconds since epoch
    pub timestamp: i64,
    /// signed timezone offset, e.g. "+0000" or "-0730"
    pub tz: String,
}

impl Person {
    /// create a new identity, validating the parts
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        tz: impl Into<String>,
    ) -> Result<Self> {
        let person = Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz: tz.into(),
        };
        person.validate()?;
        Ok(person)
    }

    fn validate(&self) -> Result<()> {
        for (label, value) in [("name", &self.name), ("email", &self.email)] {
            if value.contains('<') || value.contains('>') || value.contains('\n') {
                return Err(Error::InvalidPerson(format!(
                    "{} contains reserved character: {}",
                    label, value
                )));
            }
        }
        validate_tz(&self.tz)?;
        Ok(())
    }

    /// serialize as the canonical identity line payload:
    /// `Name <email> timestamp tz`
    pub fn to_line(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.tz
        )
    }

    /// parse a canonical identity line payload
    pub fn parse_line(line: &str) -> Result<Self> {
        let open = line
            .find(" <")
            .ok_or_else(|| Error::InvalidPerson(line.to_string()))?;
        let close = line
            .find("> ")
            .ok_or_else(|| Error::InvalidPerson(line.to_string()))?;
        if close < open {
            return Err(Error::InvalidPerson(line.to_string()));
        }

        let name = &line[..open];
        let email = &line[open + 2..close];
        let rest = &line[close + 2..];

        let mut parts = rest.split(' ');
        let timestamp = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::InvalidPerson(line.to_string()))?;
        let tz = parts
            .next()
            .ok_or_else(|| Error::InvalidPerson(line.to_string()))?;
        if parts.next().is_some() {
            return Err(Error::InvalidPerson(line.to_string()));
        }

        Self::new(name, email, timestamp, tz)
    }
}

/// timezone offsets are exactly a sign plus four digits
fn validate_tz(tz: &str) -> Result<()> {
    let bytes = tz.as_bytes();
    let valid = bytes.len() == 5
        && (bytes[0] == b'+' || bytes[0] == b'-')
        && bytes[1..].iter().all(|b| b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPerson(format!("bad timezone offset: {}", tz)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_line_roundtrip() {
        let p = Person::new("Developer", "dev@example.com", 1234567890, "+0000").unwrap();
        let line = p.to_line();
        assert_eq!(line, "Developer <dev@example.com> 1234567890 +0000");

        let parsed = Person::parse_line(&line).unwrap();
        assert_eq!(p, parsed);
    }

    #[test]
    fn test_person_negative_offset() {
        let p = Person::new("A B", "a@b.c", 0, "-0730").unwrap();
        let parsed = Person::parse_line(&p.to_line()).unwrap();
        assert_eq!(parsed.tz, "-0730");
        assert_eq!(parsed.name, "A B");
    }

    #[test]
    fn test_person_name_with_spaces() {
        let line = "Some Long Name <x@y.z> 99 +0100";
        let p = Person::parse_line(line).unwrap();
        assert_eq!(p.name, "Some Long Name");
        assert_eq!(p.email, "x@y.z");
        assert_eq!(p.timestamp, 99);
    }

    #[test]
    fn test_person_rejects_brackets() {
        assert!(Person::new("a<b", "x@y", 0, "+0000").is_err());
        assert!(Person::new("ab", "x>y", 0, "+0000").is_err());
        assert!(Person::new("a\nb", "x@y", 0, "+0000").is_err());
    }

    #[test]
    fn test_person_rejects_bad_tz() {
        assert!(Person::new("a", "x@y", 0, "0000").is_err());
        assert!(Person::new("a", "x@y", 0, "+000").is_err());
        assert!(Person::new("a", "x@y", 0, "+00a0").is_err());
        assert!(Person::new("a", "x@y", 0, "").is_err());
    }

    #[test]
    fn test_parse_malformed_lines() {
        assert!(Person::parse_line("no brackets at all").is_err());
        assert!(Person::parse_line("Name <a@b> notatimestamp +0000").is_err());
        assert!(Person::parse_line("Name <a@b> 12 +0000 extra").is_err());
    }
}
