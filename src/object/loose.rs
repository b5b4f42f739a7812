//! loose object codec: zlib("type size\0content") under
//! two-level hex keys

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{hash_object, ObjectHasher, ObjectId, ObjectType};
use crate::storage::RawStorage;

/// storage key of a loose object
pub fn object_key(id: &ObjectId) -> String {
    let (dir, file) = id.to_path_components();
    format!("{}/{}", dir, file)
}

fn header(kind: ObjectType, size: u64) -> Vec<u8> {
    format!("{} {}\0", kind.as_str(), size).into_bytes()
}

/// store a fully materialized object; returns its id
pub fn write_loose(storage: &dyn RawStorage, kind: ObjectType, content: &[u8]) -> Result<ObjectId> {
    let id = hash_object(kind, content);
    let key = object_key(&id);

    // content addressing makes double-stores free
    if storage.has(&key)? {
        return Ok(id);
    }

    let raw: Vec<u8> = header(kind, content.len() as u64)
        .into_iter()
        .chain(content.iter().copied())
        .collect();
    let mut encoder = ZlibEncoder::new(std::io::Cursor::new(raw), Compression::default());
    storage.store(&key, &mut encoder)?;

    Ok(id)
}

/// store an object from a stream without materializing it
///
/// the canonical header needs the content length before the first
/// hashed byte, so the stream is spooled to an anonymous temp file,
/// hashed, then deflated into storage.
pub fn write_loose_stream(
    storage: &dyn RawStorage,
    kind: ObjectType,
    reader: &mut dyn Read,
) -> Result<(ObjectId, u64)> {
    let spool_err = |e| Error::Io {
        path: "<spool>".into(),
        source: e,
    };
    let mut spool = tempfile::tempfile().map_err(spool_err)?;

    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).with_path("<stream>")?;
        if n == 0 {
            break;
        }
        spool.write_all(&buf[..n]).map_err(spool_err)?;
        size += n as u64;
    }

    spool.seek(SeekFrom::Start(0)).map_err(spool_err)?;
    let mut hasher = ObjectHasher::new(kind, size);
    loop {
        let n = spool.read(&mut buf).map_err(spool_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let id = hasher.finalize();

    let key = object_key(&id);
    if storage.has(&key)? {
        return Ok((id, size));
    }

    spool.seek(SeekFrom::Start(0)).map_err(spool_err)?;
    let raw = std::io::Cursor::new(header(kind, size)).chain(spool);
    let mut encoder = ZlibEncoder::new(raw, Compression::default());
    storage.store(&key, &mut encoder)?;

    Ok((id, size))
}

/// open a loose object: parsed header plus the content stream
///
/// returns None when the object is not present loose.
pub fn read_loose<'a>(
    storage: &'a dyn RawStorage,
    id: &ObjectId,
) -> Result<Option<(ObjectType, u64, Box<dyn Read + 'a>)>> {
    let key = object_key(id);
    let raw = match storage.load(&key, 0, None) {
        Ok(raw) => raw,
        Err(Error::KeyNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut decoder = ZlibDecoder::new(raw);
    let (kind, size) = parse_header(&mut decoder, id)?;
    Ok(Some((kind, size, Box::new(decoder.take(size)))))
}

/// read a loose object fully into memory
pub fn read_loose_bytes(
    storage: &dyn RawStorage,
    id: &ObjectId,
) -> Result<Option<(ObjectType, Vec<u8>)>> {
    let (kind, size, mut stream) = match read_loose(storage, id)? {
        Some(parts) => parts,
        None => return Ok(None),
    };

    let mut content = Vec::with_capacity(size as usize);
    stream
        .read_to_end(&mut content)
        .with_path(object_key(id))?;
    if content.len() as u64 != size {
        return Err(Error::CorruptObjectMessage(format!(
            "loose object {} has {} content bytes, header promises {}",
            id,
            content.len(),
            size
        )));
    }
    Ok(Some((kind, content)))
}

/// header size of a loose object without reading its content
pub fn loose_size(storage: &dyn RawStorage, id: &ObjectId) -> Result<Option<u64>> {
    Ok(read_loose(storage, id)?.map(|(_, size, _)| size))
}

fn parse_header(reader: &mut dyn Read, id: &ObjectId) -> Result<(ObjectType, u64)> {
    // header is "type size\0" with a small upper bound
    let mut header = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).with_path(object_key(id))?;
        if n == 0 || header.len() > 31 {
            return Err(Error::CorruptObjectMessage(format!(
                "loose object {} header missing NUL",
                id
            )));
        }
        if byte[0] == 0 {
            break;
        }
        header.push(byte[0]);
    }

    let text = std::str::from_utf8(&header)
        .map_err(|_| Error::CorruptObjectMessage(format!("loose object {} header not ascii", id)))?;
    let (kind, size) = text.split_once(' ').ok_or_else(|| {
        Error::CorruptObjectMessage(format!("loose object {} header lacks size", id))
    })?;

    let kind = ObjectType::parse(kind)?;
    let size = size.parse::<u64>().map_err(|_| {
        Error::CorruptObjectMessage(format!("loose object {} header has bad size", id))
    })?;
    Ok((kind, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    #[test]
    fn test_write_read_roundtrip() {
        let storage = MemStorage::new();
        let id = write_loose(&storage, ObjectType::Blob, b"hello loose world").unwrap();

        let (kind, content) = read_loose_bytes(&storage, &id).unwrap().unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(content, b"hello loose world");

        // content rehashes to the id
        assert_eq!(hash_object(kind, &content), id);
    }

    #[test]
    fn test_write_is_idempotent() {
        let storage = MemStorage::new();
        let h1 = write_loose(&storage, ObjectType::Blob, b"same").unwrap();
        let h2 = write_loose(&storage, ObjectType::Blob, b"same").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(storage.keys().unwrap().count(), 1);
    }

    #[test]
    fn test_stream_matches_buffered() {
        let storage = MemStorage::new();
        let content = b"streamed content that is a bit longer than a line";

        let buffered = write_loose(&storage, ObjectType::Blob, content).unwrap();
        let (streamed, size) =
            write_loose_stream(&storage, ObjectType::Blob, &mut &content[..]).unwrap();

        assert_eq!(buffered, streamed);
        assert_eq!(size, content.len() as u64);
    }

    #[test]
    fn test_read_absent_is_none() {
        let storage = MemStorage::new();
        assert!(read_loose_bytes(&storage, &ObjectId::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_loose_size() {
        let storage = MemStorage::new();
        let id = write_loose(&storage, ObjectType::Blob, b"12345").unwrap();
        assert_eq!(loose_size(&storage, &id).unwrap(), Some(5));
        assert_eq!(loose_size(&storage, &ObjectId::ZERO).unwrap(), None);
    }

    #[test]
    fn test_key_layout() {
        let id = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        assert_eq!(object_key(&id), "e6/9de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_types_share_one_keyspace() {
        let storage = MemStorage::new();
        let blob = write_loose(&storage, ObjectType::Blob, b"x").unwrap();
        let tag = write_loose(&storage, ObjectType::Tag, b"x").unwrap();
        assert_ne!(blob, tag);

        let (kind, _) = read_loose_bytes(&storage, &tag).unwrap().unwrap();
        assert_eq!(kind, ObjectType::Tag);
    }
}
