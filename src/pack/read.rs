//! random access into pack files: entry parsing, delta chain
//! resolution, and offset reads into delta-reconstructed content

use std::io::BufReader;
use std::sync::Arc;

use crate::delta::{apply_delta, codec, Delta, DeltaReader, ReadAt};
use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::pack::{index_key, pack_key, CountingReader, EntryKind, PackIndex};
use crate::storage::{load_bytes, RawStorage};

/// how a delta entry names its base
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaBase {
    /// relative distance back within the same pack
    Ofs(u64),
    /// base named by object id, possibly outside this pack
    Ref(ObjectId),
}

/// an unresolved delta entry, as stored
pub struct RawDelta {
    pub base: DeltaBase,
    /// zlib-compressed instruction stream, exactly as packed
    pub compressed: Vec<u8>,
    /// uncompressed instruction stream length
    pub delta_size: u64,
}

impl RawDelta {
    /// inflate and parse the instruction stream
    pub fn decode_instructions(&self) -> Result<Delta> {
        let mut scan = CountingReader::new(self.compressed.as_slice());
        let (bytes, _) = scan.inflate(self.delta_size)?;
        codec::decode(&bytes)
    }
}

/// diagnostics for a delta-stored object
#[derive(Clone, Copy, Debug)]
pub struct DeltaChainInfo {
    /// immediate base object
    pub base: ObjectId,
    /// links until a non-delta entry
    pub depth: usize,
    /// result bytes minus instruction bytes
    pub savings: i64,
}

struct ParsedEntry {
    kind: EntryKind,
    size: u64,
    base: Option<DeltaBase>,
    /// inflated payload: object content, or delta instructions
    data: Vec<u8>,
}

/// reader over one pack file and its index
pub struct PackReader {
    storage: Arc<dyn RawStorage>,
    key: String,
    index: PackIndex,
    max_chain_depth: usize,
}

impl PackReader {
    /// open the pack named by its trailing checksum; the sidecar
    /// index is used when present and intact, rebuilt otherwise
    pub fn open(
        storage: Arc<dyn RawStorage>,
        checksum: &ObjectId,
        max_chain_depth: usize,
    ) -> Result<Self> {
        let key = pack_key(checksum);
        let idx_key = index_key(checksum);

        let index = match storage.has(&idx_key)? {
            true => match PackIndex::parse(&load_bytes(storage.as_ref(), &idx_key)?) {
                Ok(index) if index.pack_checksum() == *checksum => index,
                Ok(_) | Err(_) => {
                    log::debug!("pack index {} unusable, rebuilding", idx_key);
                    Self::build_index(storage.as_ref(), &key)?
                }
            },
            false => Self::build_index(storage.as_ref(), &key)?,
        };

        if index.pack_checksum() != *checksum {
            return Err(Error::PackChecksumMismatch {
                expected: *checksum,
                actual: index.pack_checksum(),
            });
        }

        Ok(Self {
            storage,
            key,
            index,
            max_chain_depth,
        })
    }

    fn build_index(storage: &dyn RawStorage, key: &str) -> Result<PackIndex> {
        let reader = BufReader::new(storage.load(key, 0, None)?);
        PackIndex::build_from_pack(reader)
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn checksum(&self) -> ObjectId {
        self.index.pack_checksum()
    }

    pub fn object_count(&self) -> usize {
        self.index.len()
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.index.has(id)
    }

    /// ids of every object in this pack, in id order
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.index.entries().iter().map(|e| e.id)
    }

    /// load and fully resolve an object
    ///
    /// returns None when this pack does not contain `id`; a REF_DELTA
    /// whose base lives outside the pack surfaces as
    /// `MissingDeltaBase` so the caller can fall back to another
    /// layer.
    pub fn load(&self, id: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>> {
        let entry = match self.index.lookup(id) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        let mut visited = Vec::new();
        self.resolve_at(entry.offset, 0, &mut visited).map(Some)
    }

    fn parse_entry(&self, offset: u64) -> Result<ParsedEntry> {
        let reader = BufReader::new(self.storage.load(&self.key, offset, None)?);
        let mut scan = CountingReader::new(reader);

        let (kind, size) = scan.read_entry_header()?;
        let base = match kind {
            EntryKind::OfsDelta => Some(DeltaBase::Ofs(scan.read_ofs_distance()?)),
            EntryKind::RefDelta => {
                let mut raw = [0u8; 20];
                scan.read_exact(&mut raw)?;
                Some(DeltaBase::Ref(ObjectId::from_bytes(raw)))
            }
            _ => None,
        };
        let (data, _) = scan.inflate(size)?;

        Ok(ParsedEntry {
            kind,
            size,
            base,
            data,
        })
    }

    fn base_offset(&self, entry_offset: u64, base: DeltaBase) -> Result<u64> {
        match base {
            DeltaBase::Ofs(distance) => entry_offset.checked_sub(distance).ok_or_else(|| {
                Error::CorruptPack("ofs delta points before pack start".to_string())
            }),
            DeltaBase::Ref(base_id) => match self.index.lookup(&base_id) {
                Some(entry) => Ok(entry.offset),
                None => Err(Error::MissingDeltaBase(base_id)),
            },
        }
    }

    fn resolve_at(
        &self,
        offset: u64,
        depth: usize,
        visited: &mut Vec<u64>,
    ) -> Result<(ObjectType, Vec<u8>)> {
        if depth > self.max_chain_depth {
            return Err(Error::DeltaChainTooDeep(self.max_chain_depth));
        }
        if visited.contains(&offset) {
            return Err(Error::CorruptPack("delta chain cycle".to_string()));
        }
        visited.push(offset);

        let entry = self.parse_entry(offset)?;
        match entry.base {
            None => {
                let object_type = entry.kind.object_type().expect("non-delta kind");
                Ok((object_type, entry.data))
            }
            Some(base) => {
                log::trace!("resolving delta at {} (depth {})", offset, depth);
                let base_offset = self.base_offset(offset, base)?;
                let (base_type, base_data) = self.resolve_at(base_offset, depth + 1, visited)?;
                let delta = codec::decode(&entry.data)?;
                Ok((base_type, apply_delta(&base_data, &delta)?))
            }
        }
    }

    /// the compressed delta bytes of a delta-stored object, without
    /// resolving; None when absent or stored as a full entry
    pub fn load_raw_delta(&self, id: &ObjectId) -> Result<Option<RawDelta>> {
        let entry = match self.index.lookup(id) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        // header only; payload extent comes from the entry that
        // follows (or the trailer)
        let reader = BufReader::new(self.storage.load(&self.key, entry.offset, None)?);
        let mut scan = CountingReader::new(reader);
        let (kind, size) = scan.read_entry_header()?;
        let base = match kind {
            EntryKind::OfsDelta => DeltaBase::Ofs(scan.read_ofs_distance()?),
            EntryKind::RefDelta => {
                let mut raw = [0u8; 20];
                scan.read_exact(&mut raw)?;
                DeltaBase::Ref(ObjectId::from_bytes(raw))
            }
            _ => return Ok(None),
        };

        let data_offset = entry.offset + scan.offset();
        let data_end = match self.next_entry_offset(entry.offset) {
            Some(next) => next,
            None => self.storage.size(&self.key)? - 20,
        };
        let mut compressed = vec![0u8; (data_end - data_offset) as usize];
        let mut reader = self
            .storage
            .load(&self.key, data_offset, Some(compressed.len() as u64))?;
        std::io::Read::read_exact(&mut reader, &mut compressed)
            .map_err(|_| Error::CorruptPack("truncated delta payload".to_string()))?;

        Ok(Some(RawDelta {
            base,
            compressed,
            delta_size: size,
        }))
    }

    fn next_entry_offset(&self, offset: u64) -> Option<u64> {
        self.index
            .entries()
            .iter()
            .map(|e| e.offset)
            .filter(|&o| o > offset)
            .min()
    }

    /// chain diagnostics: immediate base, chain depth, and the bytes
    /// saved by storing the object as a delta
    pub fn delta_chain_info(&self, id: &ObjectId) -> Result<Option<DeltaChainInfo>> {
        let entry = match self.index.lookup(id) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        let parsed = self.parse_entry(entry.offset)?;
        let base = match parsed.base {
            None => return Ok(None),
            Some(base) => base,
        };

        let base_id = match base {
            DeltaBase::Ref(base_id) => base_id,
            DeltaBase::Ofs(_) => {
                let base_offset = self.base_offset(entry.offset, base)?;
                self.index.id_at_offset(base_offset).ok_or_else(|| {
                    Error::CorruptPack("ofs delta base not in index".to_string())
                })?
            }
        };

        // depth: links until a non-delta entry
        let mut depth = 1usize;
        let mut offset = self.base_offset(entry.offset, base)?;
        loop {
            if depth > self.max_chain_depth {
                return Err(Error::DeltaChainTooDeep(self.max_chain_depth));
            }
            let link = self.parse_entry(offset)?;
            match link.base {
                None => break,
                Some(next) => {
                    depth += 1;
                    offset = self.base_offset(offset, next)?;
                }
            }
        }

        let delta = codec::decode(&parsed.data)?;
        let savings = delta.result_size as i64 - parsed.size as i64;
        Ok(Some(DeltaChainInfo {
            base: base_id,
            depth,
            savings,
        }))
    }

    /// positioned reads into the object without materializing the
    /// reconstructed content; only the bottom full entry is inflated
    pub fn random_access(&self, id: &ObjectId) -> Result<Option<Box<dyn ReadAt>>> {
        let entry = match self.index.lookup(id) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        let mut visited = Vec::new();
        self.reader_at(entry.offset, 0, &mut visited).map(Some)
    }

    fn reader_at(
        &self,
        offset: u64,
        depth: usize,
        visited: &mut Vec<u64>,
    ) -> Result<Box<dyn ReadAt>> {
        if depth > self.max_chain_depth {
            return Err(Error::DeltaChainTooDeep(self.max_chain_depth));
        }
        if visited.contains(&offset) {
            return Err(Error::CorruptPack("delta chain cycle".to_string()));
        }
        visited.push(offset);

        let entry = self.parse_entry(offset)?;
        match entry.base {
            None => Ok(Box::new(entry.data)),
            Some(base) => {
                let base_offset = self.base_offset(offset, base)?;
                let base_reader = self.reader_at(base_offset, depth + 1, visited)?;
                let delta = codec::decode(&entry.data)?;
                Ok(Box::new(DeltaReader::new(base_reader, delta)?))
            }
        }
    }

    /// re-scan the whole pack, verifying the trailing checksum and
    /// every indexed id and CRC32
    pub fn verify(&self) -> Result<()> {
        let rebuilt = Self::build_index(self.storage.as_ref(), &self.key)?;
        if rebuilt.pack_checksum() != self.index.pack_checksum() {
            return Err(Error::PackChecksumMismatch {
                expected: self.index.pack_checksum(),
                actual: rebuilt.pack_checksum(),
            });
        }
        if rebuilt.entries() != self.index.entries() {
            return Err(Error::CorruptPackIndex(format!(
                "index for {} does not match pack contents",
                self.key
            )));
        }
        Ok(())
    }
}

/// scan the keys of a storage for pack files, returning their
/// checksums
pub fn scan_pack_keys(storage: &dyn RawStorage) -> Result<Vec<ObjectId>> {
    let mut checksums = Vec::new();
    for key in storage.keys()? {
        let key = key?;
        if let Some(hex) = key
            .strip_prefix("pack/pack-")
            .and_then(|rest| rest.strip_suffix(".pack"))
        {
            if let Ok(id) = ObjectId::from_hex(hex) {
                checksums.push(id);
            }
        }
    }
    checksums.sort();
    Ok(checksums)
}
