//! delta compression: rolling-hash similarity search, instruction
//! streams, pack v2 framing, and random-access reads into
//! delta-reconstructed content

mod apply;
mod build;
pub mod codec;
mod rolling;

pub use apply::{apply_delta, DeltaMap, DeltaReader};
pub use build::{acceptable, build_delta};
pub use rolling::{strong_checksum, BlockIndex, RollingSum};

use crate::error::Result;

/// one instruction of the delta VM
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaOp {
    /// copy `len` bytes from `offset` in the base
    Copy { offset: u64, len: u64 },
    /// append literal bytes
    Insert(Vec<u8>),
}

impl DeltaOp {
    pub fn len(&self) -> u64 {
        match self {
            DeltaOp::Copy { len, .. } => *len,
            DeltaOp::Insert(data) => data.len() as u64,
        }
    }
}

/// an instruction stream transforming a base buffer into a target
/// buffer, with the sizes of both recorded up front
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    pub base_size: u64,
    pub result_size: u64,
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn new(base_size: u64, result_size: u64, ops: Vec<DeltaOp>) -> Self {
        Self {
            base_size,
            result_size,
            ops,
        }
    }

    /// total length produced by the instructions
    pub fn ops_result_len(&self) -> u64 {
        self.ops.iter().map(DeltaOp::len).sum()
    }
}

/// positioned reads at arbitrary offsets, without sequential state
///
/// this is the contract handed to callers that need offset reads into
/// large objects stored as deltas; full buffers and delta chains both
/// implement it.
pub trait ReadAt {
    /// total length of the readable content
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// read up to buf.len() bytes starting at offset; returns bytes
    /// read, 0 at or past the end
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl ReadAt for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= <[u8]>::len(self) as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(<[u8]>::len(self) - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        ReadAt::read_at(self.as_slice(), offset, buf)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }
}

/// read an exact range into a fresh buffer
pub fn read_range(source: &dyn ReadAt, offset: u64, length: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        let n = source.read_at(offset + filled as u64, &mut out[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    out.truncate(filled);
    Ok(out)
}
