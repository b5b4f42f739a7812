//! canonical annotated-tag codec

use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::object::commit::HeaderLines;
use crate::object::Odb;
use crate::types::{Person, Tag};

/// serialize a tag, bit-exact
pub fn encode_tag(tag: &Tag) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("object {}\n", tag.object.to_hex()).as_bytes());
    out.extend_from_slice(format!("type {}\n", tag.target_type.as_str()).as_bytes());
    out.extend_from_slice(format!("tag {}\n", tag.name).as_bytes());
    out.extend_from_slice(format!("tagger {}\n", tag.tagger.to_line()).as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&tag.message);
    out
}

/// parse a canonical tag
pub fn parse_tag(bytes: &[u8]) -> Result<Tag> {
    let mut lines = HeaderLines::new(bytes);

    let object = match lines.next_header()? {
        Some(("object", value)) => ObjectId::from_hex(value)?,
        _ => return Err(corrupt("first header must be object")),
    };
    let target_type = match lines.next_header()? {
        Some(("type", value)) => ObjectType::parse(value)?,
        _ => return Err(corrupt("expected type header")),
    };
    let name = match lines.next_header()? {
        Some(("tag", value)) => value.to_string(),
        _ => return Err(corrupt("expected tag header")),
    };
    let tagger = match lines.next_header()? {
        Some(("tagger", value)) => Person::parse_line(value)?,
        _ => return Err(corrupt("expected tagger header")),
    };

    let message = lines.into_message()?;
    Ok(Tag {
        object,
        target_type,
        name,
        tagger,
        message,
    })
}

fn corrupt(reason: &str) -> Error {
    Error::CorruptObjectMessage(format!("tag: {}", reason))
}

/// store a tag object
pub fn write_tag(odb: &Odb, tag: &Tag) -> Result<ObjectId> {
    odb.store(ObjectType::Tag, &encode_tag(tag))
}

/// load a tag object; None when absent
pub fn read_tag(odb: &Odb, id: &ObjectId) -> Result<Option<Tag>> {
    match odb.load(id)? {
        Some((ObjectType::Tag, content)) => Ok(Some(parse_tag(&content)?)),
        Some((other, _)) => Err(Error::UnexpectedObjectType {
            expected: "tag",
            actual: other.as_str(),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemStorage;
    use std::sync::Arc;

    fn mem_odb() -> Odb {
        Odb::with_storage(Arc::new(MemStorage::new()), &Config::default()).unwrap()
    }

    fn sample_tag() -> Tag {
        let target = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
        Tag::new(
            target,
            ObjectType::Commit,
            "v1.0",
            Person::new("Tagger", "t@example.com", 1234567890, "+0100").unwrap(),
            "release v1.0\n",
        )
    }

    #[test]
    fn test_encode_exact_format() {
        let bytes = encode_tag(&sample_tag());
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "object 1111111111111111111111111111111111111111\n\
             type commit\n\
             tag v1.0\n\
             tagger Tagger <t@example.com> 1234567890 +0100\n\
             \n\
             release v1.0\n"
        );
    }

    #[test]
    fn test_roundtrip() {
        let tag = sample_tag();
        let parsed = parse_tag(&encode_tag(&tag)).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_store_load() {
        let odb = mem_odb();
        let tag = sample_tag();

        let id = write_tag(&odb, &tag).unwrap();
        let loaded = read_tag(&odb, &id).unwrap().unwrap();
        assert_eq!(loaded, tag);
    }

    #[test]
    fn test_tag_of_tag() {
        let odb = mem_odb();
        let inner = write_tag(&odb, &sample_tag()).unwrap();
        let outer = Tag::new(
            inner,
            ObjectType::Tag,
            "meta",
            Person::new("Tagger", "t@example.com", 1, "+0000").unwrap(),
            "a tag of a tag",
        );
        let id = write_tag(&odb, &outer).unwrap();
        let loaded = read_tag(&odb, &id).unwrap().unwrap();
        assert_eq!(loaded.target_type, ObjectType::Tag);
        assert_eq!(loaded.object, inner);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_tag(b"").is_err());
        assert!(parse_tag(b"object zzz\n").is_err());
        assert!(parse_tag(
            b"object 1111111111111111111111111111111111111111\ntype widget\ntag x\n\nm"
        )
        .is_err());
    }

    #[test]
    fn test_read_nonexistent() {
        let odb = mem_odb();
        assert!(read_tag(&odb, &ObjectId::ZERO).unwrap().is_none());
    }
}
