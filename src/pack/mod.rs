//! pack files: multi-object storage with delta compression
//!
//! a pack is a 12-byte header, N entries (variable-length header plus
//! zlib payload), and a trailing SHA-1 of everything before it. the
//! sidecar index maps object ids to entry offsets.

pub mod index;
pub mod read;
pub mod write;

use std::io::Read;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{ObjectId, ObjectType};

pub use index::PackIndex;
pub use read::{DeltaChainInfo, PackReader, RawDelta};
pub use write::{PackBuilder, PackStats};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_HEADER_SIZE: usize = 12;
/// versions accepted on read; written packs are always version 2
pub const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// entry kind codes used in pack entry headers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl EntryKind {
    pub fn code(&self) -> u8 {
        match self {
            EntryKind::Commit => 1,
            EntryKind::Tree => 2,
            EntryKind::Blob => 3,
            EntryKind::Tag => 4,
            EntryKind::OfsDelta => 6,
            EntryKind::RefDelta => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(EntryKind::Commit),
            2 => Ok(EntryKind::Tree),
            3 => Ok(EntryKind::Blob),
            4 => Ok(EntryKind::Tag),
            6 => Ok(EntryKind::OfsDelta),
            7 => Ok(EntryKind::RefDelta),
            other => Err(Error::CorruptPack(format!(
                "unknown entry kind code {}",
                other
            ))),
        }
    }

    pub fn from_object_type(kind: ObjectType) -> Self {
        match kind {
            ObjectType::Commit => EntryKind::Commit,
            ObjectType::Tree => EntryKind::Tree,
            ObjectType::Blob => EntryKind::Blob,
            ObjectType::Tag => EntryKind::Tag,
        }
    }

    /// logical object type for non-delta kinds
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            EntryKind::Commit => Some(ObjectType::Commit),
            EntryKind::Tree => Some(ObjectType::Tree),
            EntryKind::Blob => Some(ObjectType::Blob),
            EntryKind::Tag => Some(ObjectType::Tag),
            EntryKind::OfsDelta | EntryKind::RefDelta => None,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, EntryKind::OfsDelta | EntryKind::RefDelta)
    }
}

/// pack file name derived from the trailing checksum
pub fn pack_key(checksum: &ObjectId) -> String {
    format!("pack/pack-{}.pack", checksum.to_hex())
}

/// index file name next to a pack
pub fn index_key(checksum: &ObjectId) -> String {
    format!("pack/pack-{}.idx", checksum.to_hex())
}

/// serialize an entry header: kind code in the top bits of the first
/// byte, uncompressed size in 4+7-bit little-endian groups
pub fn write_entry_header(out: &mut Vec<u8>, kind: EntryKind, size: u64) {
    let mut size = size;
    let mut byte = (kind.code() << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// serialize the negative-offset varint that follows an OFS_DELTA
/// header (distance back to the base entry)
pub fn write_ofs_distance(out: &mut Vec<u8>, distance: u64) {
    let mut bytes = [0u8; 10];
    let mut pos = bytes.len() - 1;
    let mut value = distance;
    bytes[pos] = (value & 0x7f) as u8;
    while value >> 7 > 0 {
        value = (value >> 7) - 1;
        pos -= 1;
        bytes[pos] = 0x80 | (value & 0x7f) as u8;
    }
    out.extend_from_slice(&bytes[pos..]);
}

/// a reader that counts consumed bytes and keeps a CRC32 of them,
/// used to delimit pack entries while streaming
pub struct CountingReader<R> {
    inner: R,
    offset: u64,
    crc: flate2::Crc,
    hasher: Option<sha1::Sha1>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            crc: flate2::Crc::new(),
            hasher: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn reset_crc(&mut self) {
        self.crc.reset();
    }

    pub fn crc(&self) -> u32 {
        self.crc.sum()
    }

    /// start hashing every byte read from here on
    pub fn start_hash(&mut self) {
        use sha1::Digest;
        self.hasher = Some(sha1::Sha1::new());
    }

    /// digest of the bytes read since start_hash, and stop hashing
    pub fn take_digest(&mut self) -> ObjectId {
        use sha1::Digest;
        let hasher = self.hasher.take().expect("hashing was started");
        ObjectId::from_bytes(hasher.finalize().into())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        let n = self.inner.read(&mut buf).with_path("<pack>")?;
        if n == 0 {
            return Err(Error::CorruptPack("unexpected end of pack".to_string()));
        }
        self.offset += 1;
        self.crc.update(&buf);
        if let Some(hasher) = &mut self.hasher {
            use sha1::Digest;
            hasher.update(&buf);
        }
        Ok(buf[0])
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|_| Error::CorruptPack("unexpected end of pack".to_string()))?;
        self.offset += buf.len() as u64;
        self.crc.update(buf);
        if let Some(hasher) = &mut self.hasher {
            use sha1::Digest;
            hasher.update(&buf[..]);
        }
        Ok(())
    }

    /// parse an entry header at the current position
    pub fn read_entry_header(&mut self) -> Result<(EntryKind, u64)> {
        let first = self.read_byte()?;
        let kind = EntryKind::from_code((first >> 4) & 0x07)?;
        let mut size = (first & 0x0f) as u64;
        let mut shift = 4u32;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = self.read_byte()?;
            size |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
            if shift > 64 {
                return Err(Error::CorruptPack("entry size varint overflows".to_string()));
            }
        }
        Ok((kind, size))
    }

    /// parse the OFS_DELTA negative-offset varint
    pub fn read_ofs_distance(&mut self) -> Result<u64> {
        let mut byte = self.read_byte()?;
        let mut value = (byte & 0x7f) as u64;
        while byte & 0x80 != 0 {
            byte = self.read_byte()?;
            value = ((value + 1) << 7) | (byte & 0x7f) as u64;
        }
        Ok(value)
    }

    /// inflate one zlib stream in place, consuming exactly its
    /// compressed bytes; returns (content, compressed length)
    pub fn inflate(&mut self, expected_size: u64) -> Result<(Vec<u8>, u64)> {
        let mut decompress = flate2::Decompress::new(true);
        let mut out = Vec::with_capacity(expected_size as usize + 1);

        loop {
            let byte = [self.read_byte()?];
            // feed the byte until zlib accepts it; output space is
            // grown first so lack of progress means corruption
            loop {
                if out.len() == out.capacity() {
                    out.reserve(64 * 1024);
                }
                let before_in = decompress.total_in();
                let status = decompress
                    .decompress_vec(&byte, &mut out, flate2::FlushDecompress::None)
                    .map_err(|e| Error::CorruptPack(format!("zlib error: {}", e)))?;
                let accepted = decompress.total_in() > before_in;

                match status {
                    flate2::Status::StreamEnd => {
                        if out.len() as u64 != expected_size {
                            return Err(Error::CorruptPack(format!(
                                "entry inflated to {} bytes, header promised {}",
                                out.len(),
                                expected_size
                            )));
                        }
                        return Ok((out, decompress.total_in()));
                    }
                    flate2::Status::Ok | flate2::Status::BufError => {
                        if accepted {
                            break;
                        }
                        if out.len() < out.capacity() {
                            return Err(Error::CorruptPack(
                                "zlib stream cannot make progress".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}
