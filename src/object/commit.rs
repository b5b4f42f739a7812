//! canonical commit codec: the line-based format with tree, parents,
//! author, committer, blank line, message

use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::object::Odb;
use crate::types::{Commit, Person};

/// serialize a commit, bit-exact
pub fn encode_commit(commit: &Commit) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("tree {}\n", commit.tree.to_hex()).as_bytes());
    for parent in &commit.parents {
        out.extend_from_slice(format!("parent {}\n", parent.to_hex()).as_bytes());
    }
    out.extend_from_slice(format!("author {}\n", commit.author.to_line()).as_bytes());
    out.extend_from_slice(format!("committer {}\n", commit.committer.to_line()).as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&commit.message);
    out
}

/// parse a canonical commit
pub fn parse_commit(bytes: &[u8]) -> Result<Commit> {
    let mut lines = HeaderLines::new(bytes);

    let tree = match lines.next_header()? {
        Some(("tree", value)) => ObjectId::from_hex(value)?,
        _ => return Err(corrupt("first header must be tree")),
    };

    let mut parents = Vec::new();
    let author;
    loop {
        match lines.next_header()? {
            Some(("parent", value)) => parents.push(ObjectId::from_hex(value)?),
            Some(("author", value)) => {
                author = Person::parse_line(value)?;
                break;
            }
            _ => return Err(corrupt("expected parent or author header")),
        }
    }

    let committer = match lines.next_header()? {
        Some(("committer", value)) => Person::parse_line(value)?,
        _ => return Err(corrupt("expected committer header")),
    };

    let message = lines.into_message()?;
    Ok(Commit {
        tree,
        parents,
        author,
        committer,
        message,
    })
}

fn corrupt(reason: &str) -> Error {
    Error::CorruptObjectMessage(format!("commit: {}", reason))
}

/// header-line cursor shared by the commit and tag parsers
pub(crate) struct HeaderLines<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderLines<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// next `key value` header line, or None at the blank separator
    pub(crate) fn next_header(&mut self) -> Result<Option<(&'a str, &'a str)>> {
        if self.bytes.get(self.pos) == Some(&b'\n') {
            return Ok(None);
        }
        let rest = &self.bytes[self.pos..];
        let eol = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("unterminated header line"))?;
        let line = std::str::from_utf8(&rest[..eol])
            .map_err(|_| corrupt("header line not utf-8"))?;
        self.pos += eol + 1;

        let (key, value) = line
            .split_once(' ')
            .ok_or_else(|| corrupt("header line lacks value"))?;
        Ok(Some((key, value)))
    }

    /// consume the blank separator and return the message bytes
    pub(crate) fn into_message(self) -> Result<Vec<u8>> {
        if self.bytes.get(self.pos) != Some(&b'\n') {
            return Err(corrupt("missing blank line before message"));
        }
        Ok(self.bytes[self.pos + 1..].to_vec())
    }
}

/// store a commit
pub fn write_commit(odb: &Odb, commit: &Commit) -> Result<ObjectId> {
    odb.store(ObjectType::Commit, &encode_commit(commit))
}

/// load a commit; None when absent
pub fn read_commit(odb: &Odb, id: &ObjectId) -> Result<Option<Commit>> {
    match odb.load(id)? {
        Some((ObjectType::Commit, content)) => Ok(Some(parse_commit(&content)?)),
        Some((other, _)) => Err(Error::UnexpectedObjectType {
            expected: "commit",
            actual: other.as_str(),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hash::EMPTY_TREE_ID;
    use crate::storage::MemStorage;
    use std::sync::Arc;

    fn mem_odb() -> Odb {
        Odb::with_storage(Arc::new(MemStorage::new()), &Config::default()).unwrap()
    }

    fn person() -> Person {
        Person::new("Developer", "dev@example.com", 1234567890, "+0000").unwrap()
    }

    #[test]
    fn test_encode_exact_format() {
        let commit = Commit::new(EMPTY_TREE_ID, vec![], person(), person(), "Initial commit");
        let bytes = encode_commit(&commit);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
             author Developer <dev@example.com> 1234567890 +0000\n\
             committer Developer <dev@example.com> 1234567890 +0000\n\
             \n\
             Initial commit"
        );
    }

    #[test]
    fn test_roundtrip_root() {
        let commit = Commit::new(EMPTY_TREE_ID, vec![], person(), person(), "msg body\n");
        let parsed = parse_commit(&encode_commit(&commit)).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn test_roundtrip_merge() {
        let p1 = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
        let p2 = ObjectId::from_hex("2222222222222222222222222222222222222222").unwrap();
        let commit = Commit::new(
            EMPTY_TREE_ID,
            vec![p1, p2],
            person(),
            Person::new("Other", "o@example.com", 99, "-0500").unwrap(),
            "Merge branch\n\nwith a body\n",
        );
        let parsed = parse_commit(&encode_commit(&commit)).unwrap();
        assert_eq!(parsed, commit);
        assert!(parsed.is_merge());
    }

    #[test]
    fn test_store_load() {
        let odb = mem_odb();
        let commit = Commit::new(EMPTY_TREE_ID, vec![], person(), person(), "stored");

        let id = write_commit(&odb, &commit).unwrap();
        let loaded = read_commit(&odb, &id).unwrap().unwrap();
        assert_eq!(loaded, commit);

        // storing again yields the same id
        assert_eq!(write_commit(&odb, &commit).unwrap(), id);
    }

    #[test]
    fn test_read_nonexistent() {
        let odb = mem_odb();
        assert!(read_commit(&odb, &ObjectId::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_commit(b"").is_err());
        assert!(parse_commit(b"author Dev <d@e> 0 +0000\n\nmsg").is_err());
        assert!(parse_commit(b"tree zzz\n\nmsg").is_err());
        assert!(
            parse_commit(b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\nno blank line").is_err()
        );
    }

    #[test]
    fn test_type_guard() {
        let odb = mem_odb();
        let blob = odb.store(ObjectType::Blob, b"not a commit").unwrap();
        assert!(matches!(
            read_commit(&odb, &blob),
            Err(Error::UnexpectedObjectType { .. })
        ));
    }
}
