//! the packed-refs file format: one header, `<hex> <refname>` lines,
//! optional `^<hex>` peel lines attached to the preceding ref

use crate::error::{Error, Result};
use crate::hash::ObjectId;

/// one entry of a packed-refs file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub id: ObjectId,
    /// peeled target of an annotated tag, from a `^` line
    pub peeled: Option<ObjectId>,
}

/// parse a packed-refs file
///
/// blank lines and comments are ignored; the header comment flags the
/// `peeled` trait. LF, CRLF, and CR line endings are all accepted and
/// object ids are normalized to lowercase.
pub fn parse_packed_refs(content: &[u8]) -> Result<Vec<PackedRef>> {
    let text = std::str::from_utf8(content).map_err(|_| Error::CorruptPackedRefs {
        line: 0,
        reason: "not utf-8".to_string(),
    })?;
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut refs: Vec<PackedRef> = Vec::new();
    for (number, line) in normalized.split('\n').enumerate() {
        let number = number + 1;
        let malformed = |reason: &str| Error::CorruptPackedRefs {
            line: number,
            reason: reason.to_string(),
        };

        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(hex) = line.strip_prefix('^') {
            let id = parse_hex(hex, number)?;
            let last = refs.last_mut().ok_or_else(|| {
                malformed("peel line before any ref")
            })?;
            last.peeled = Some(id);
            continue;
        }

        let (hex, name) = line
            .split_once(' ')
            .ok_or_else(|| malformed("missing ref name"))?;
        if name.is_empty() || name.contains(' ') {
            return Err(malformed("bad ref name"));
        }
        refs.push(PackedRef {
            name: name.to_string(),
            id: parse_hex(hex, number)?,
            peeled: None,
        });
    }

    Ok(refs)
}

fn parse_hex(hex: &str, line: usize) -> Result<ObjectId> {
    if hex.len() != 40 {
        return Err(Error::CorruptPackedRefs {
            line,
            reason: format!("object id has {} chars", hex.len()),
        });
    }
    ObjectId::from_hex(&hex.to_ascii_lowercase()).map_err(|_| Error::CorruptPackedRefs {
        line,
        reason: "object id not hex".to_string(),
    })
}

/// serialize packed refs, sorted by name, with the peeled header
pub fn encode_packed_refs(refs: &[PackedRef]) -> Vec<u8> {
    let mut sorted: Vec<&PackedRef> = refs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::from("# pack-refs with: peeled fully-peeled sorted \n");
    for r in sorted {
        out.push_str(&format!("{} {}\n", r.id.to_hex(), r.name));
        if let Some(peeled) = &r.peeled {
            out.push_str(&format!("^{}\n", peeled.to_hex()));
        }
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_peel() {
        let input = "\
# pack-refs with: peeled
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa refs/tags/v1.0
^bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
dddddddddddddddddddddddddddddddddddddddd refs/heads/feature
";
        let refs = parse_packed_refs(input.as_bytes()).unwrap();
        assert_eq!(refs.len(), 2);

        assert_eq!(refs[0].name, "refs/tags/v1.0");
        assert_eq!(
            refs[0].id.to_hex(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert_eq!(
            refs[0].peeled.unwrap().to_hex(),
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        );

        assert_eq!(refs[1].name, "refs/heads/feature");
        assert_eq!(
            refs[1].id.to_hex(),
            "dddddddddddddddddddddddddddddddddddddddd"
        );
        assert!(refs[1].peeled.is_none());
    }

    #[test]
    fn test_parse_line_endings() {
        for newline in ["\n", "\r\n", "\r"] {
            let input = format!(
                "# header{nl}aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa refs/heads/main{nl}",
                nl = newline
            );
            let refs = parse_packed_refs(input.as_bytes()).unwrap();
            assert_eq!(refs.len(), 1, "with ending {:?}", newline);
            assert_eq!(refs[0].name, "refs/heads/main");
        }
    }

    #[test]
    fn test_parse_uppercase_normalized() {
        let input = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA refs/heads/main\n";
        let refs = parse_packed_refs(input.as_bytes()).unwrap();
        assert_eq!(
            refs[0].id.to_hex(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn test_parse_ignores_blank_and_comments() {
        let input = "\n# comment\n\naaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa refs/x\n\n";
        let refs = parse_packed_refs(input.as_bytes()).unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_parse_rejects_peel_first() {
        let input = "^aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n";
        assert!(matches!(
            parse_packed_refs(input.as_bytes()),
            Err(Error::CorruptPackedRefs { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        let input = "abcd refs/heads/main\n";
        assert!(parse_packed_refs(input.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        let input = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n";
        assert!(parse_packed_refs(input.as_bytes()).is_err());
    }

    #[test]
    fn test_encode_roundtrip() {
        let refs = vec![
            PackedRef {
                name: "refs/tags/v1.0".to_string(),
                id: ObjectId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap(),
                peeled: Some(
                    ObjectId::from_hex("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap(),
                ),
            },
            PackedRef {
                name: "refs/heads/main".to_string(),
                id: ObjectId::from_hex("cccccccccccccccccccccccccccccccccccccccc").unwrap(),
                peeled: None,
            },
        ];
        let encoded = encode_packed_refs(&refs);
        let parsed = parse_packed_refs(&encoded).unwrap();

        // encoding sorts by name
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "refs/heads/main");
        assert_eq!(parsed[1].name, "refs/tags/v1.0");
        assert_eq!(parsed[1].peeled, refs[0].peeled);
    }
}
