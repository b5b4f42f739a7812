use std::io::Read;

use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::object::Odb;

/// store blob content
pub fn write_blob(odb: &Odb, content: &[u8]) -> Result<ObjectId> {
    odb.store(ObjectType::Blob, content)
}

/// store blob content from a stream, without materializing it
pub fn write_blob_stream(odb: &Odb, reader: &mut dyn Read) -> Result<(ObjectId, u64)> {
    odb.store_stream(ObjectType::Blob, reader)
}

/// open blob content as a stream; None when absent
pub fn open_blob<'a>(odb: &'a Odb, id: &ObjectId) -> Result<Option<(u64, Box<dyn Read + 'a>)>> {
    match odb.open_stream(id)? {
        Some((ObjectType::Blob, size, stream)) => Ok(Some((size, stream))),
        Some((other, _, _)) => Err(Error::UnexpectedObjectType {
            expected: "blob",
            actual: other.as_str(),
        }),
        None => Ok(None),
    }
}

/// read blob content fully; None when absent
pub fn read_blob(odb: &Odb, id: &ObjectId) -> Result<Option<Vec<u8>>> {
    match odb.load(id)? {
        Some((ObjectType::Blob, content)) => Ok(Some(content)),
        Some((other, _)) => Err(Error::UnexpectedObjectType {
            expected: "blob",
            actual: other.as_str(),
        }),
        None => Ok(None),
    }
}

pub fn blob_exists(odb: &Odb, id: &ObjectId) -> Result<bool> {
    odb.has(id)
}

pub fn blob_size(odb: &Odb, id: &ObjectId) -> Result<Option<u64>> {
    odb.size(id)
}

/// delete a loose blob
pub fn delete_blob(odb: &Odb, id: &ObjectId) -> Result<bool> {
    odb.delete(id)
}
