//! pack index: sorted ObjectId -> entry offset map with per-entry
//! CRC32, produced by streaming the pack once

use std::io::Read;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::pack::{CountingReader, EntryKind, PACK_SIGNATURE, SUPPORTED_VERSIONS};

/// magic of the v2 index format: "\377tOc"
pub const INDEX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
pub const INDEX_VERSION: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// in-memory pack index, entries sorted by ObjectId
pub struct PackIndex {
    entries: Vec<IndexEntry>,
    by_offset: Vec<(u64, usize)>,
    pack_checksum: ObjectId,
}

impl PackIndex {
    pub fn from_entries(mut entries: Vec<IndexEntry>, pack_checksum: ObjectId) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        let mut by_offset: Vec<(u64, usize)> =
            entries.iter().enumerate().map(|(i, e)| (e.offset, i)).collect();
        by_offset.sort_by_key(|&(offset, _)| offset);
        Self {
            entries,
            by_offset,
            pack_checksum,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pack_checksum(&self) -> ObjectId {
        self.pack_checksum
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn lookup(&self, id: &ObjectId) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    /// reverse lookup: which object lives at a byte offset
    pub fn id_at_offset(&self, offset: u64) -> Option<ObjectId> {
        self.by_offset
            .binary_search_by_key(&offset, |&(o, _)| o)
            .ok()
            .map(|i| self.entries[self.by_offset[i].1].id)
    }

    /// scan a pack stream once, delimiting entries and resolving
    /// deltas enough to learn every object's id
    ///
    /// delta entries are resolved against earlier entries of the same
    /// pack (OFS) or objects already indexed (REF); the trailing
    /// checksum is verified against the hashed stream.
    pub fn build_from_pack(reader: impl Read) -> Result<Self> {
        let mut scan = CountingReader::new(reader);
        scan.start_hash();

        let mut signature = [0u8; 4];
        scan.read_exact(&mut signature)?;
        if &signature != PACK_SIGNATURE {
            return Err(Error::CorruptPack("bad pack signature".to_string()));
        }
        let mut word = [0u8; 4];
        scan.read_exact(&mut word)?;
        let version = u32::from_be_bytes(word);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(Error::UnsupportedPackVersion(version));
        }
        scan.read_exact(&mut word)?;
        let count = u32::from_be_bytes(word);

        // offset -> (type-resolved content) for delta resolution;
        // kept only while indexing
        let mut resolved: Vec<(u64, crate::hash::ObjectType, Vec<u8>)> = Vec::new();
        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let entry_offset = scan.offset();
            scan.reset_crc();
            let (kind, size) = scan.read_entry_header()?;

            let (object_type, content) = match kind {
                EntryKind::OfsDelta => {
                    let distance = scan.read_ofs_distance()?;
                    let base_offset = entry_offset.checked_sub(distance).ok_or_else(|| {
                        Error::CorruptPack("ofs delta points before pack start".to_string())
                    })?;
                    let (delta_bytes, _) = scan.inflate(size)?;
                    let (base_type, base) = resolved
                        .iter()
                        .find(|(o, _, _)| *o == base_offset)
                        .map(|(_, t, c)| (*t, c.clone()))
                        .ok_or_else(|| {
                            Error::CorruptPack(format!(
                                "ofs delta base at {} not seen",
                                base_offset
                            ))
                        })?;
                    let delta = crate::delta::codec::decode(&delta_bytes)?;
                    (base_type, crate::delta::apply_delta(&base, &delta)?)
                }
                EntryKind::RefDelta => {
                    let mut raw = [0u8; 20];
                    scan.read_exact(&mut raw)?;
                    let base_id = ObjectId::from_bytes(raw);
                    let (delta_bytes, _) = scan.inflate(size)?;
                    let found = entries
                        .iter()
                        .position(|e: &IndexEntry| e.id == base_id)
                        .map(|i| {
                            let (_, base_type, content) = &resolved[i];
                            (*base_type, content.clone())
                        });
                    let (base_type, base) =
                        found.ok_or(Error::MissingDeltaBase(base_id))?;
                    let delta = crate::delta::codec::decode(&delta_bytes)?;
                    (base_type, crate::delta::apply_delta(&base, &delta)?)
                }
                other => {
                    let object_type = other.object_type().expect("non-delta kind");
                    let (content, _) = scan.inflate(size)?;
                    (object_type, content)
                }
            };

            let id = crate::hash::hash_object(object_type, &content);
            entries.push(IndexEntry {
                id,
                offset: entry_offset,
                crc32: scan.crc(),
            });
            resolved.push((entry_offset, object_type, content));
        }

        let computed = scan.take_digest();
        let mut trailer = [0u8; 20];
        scan.read_exact(&mut trailer)?;
        let stored = ObjectId::from_bytes(trailer);
        if stored != computed {
            return Err(Error::PackChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        Ok(Self::from_entries(entries, stored))
    }

    /// serialize to the v2 sidecar format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&INDEX_SIGNATURE);
        out.extend_from_slice(&INDEX_VERSION.to_be_bytes());

        // cumulative fanout over the first id byte
        let mut fanout = [0u32; 256];
        for entry in &self.entries {
            fanout[entry.id.as_bytes()[0] as usize] += 1;
        }
        let mut running = 0u32;
        for bucket in fanout.iter_mut() {
            running += *bucket;
            *bucket = running;
        }
        for bucket in fanout {
            out.extend_from_slice(&bucket.to_be_bytes());
        }

        for entry in &self.entries {
            out.extend_from_slice(entry.id.as_bytes());
        }
        for entry in &self.entries {
            out.extend_from_slice(&entry.crc32.to_be_bytes());
        }
        for entry in &self.entries {
            if entry.offset > i32::MAX as u64 {
                return Err(Error::CorruptPackIndex(
                    "offsets beyond 2 GiB are not supported".to_string(),
                ));
            }
            out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
        }

        out.extend_from_slice(self.pack_checksum.as_bytes());
        let digest: [u8; 20] = Sha1::digest(&out).into();
        out.extend_from_slice(&digest);
        Ok(out)
    }

    /// parse the v2 sidecar format
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: &str| Error::CorruptPackIndex(reason.to_string());

        if bytes.len() < 4 + 4 + 256 * 4 + 40 {
            return Err(corrupt("file too short"));
        }
        if bytes[0..4] != INDEX_SIGNATURE {
            return Err(corrupt("bad signature"));
        }
        let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(Error::UnsupportedPackVersion(version));
        }

        // self-check before trusting any field
        let body_len = bytes.len() - 20;
        let digest: [u8; 20] = Sha1::digest(&bytes[..body_len]).into();
        if digest != bytes[body_len..] {
            return Err(corrupt("checksum mismatch"));
        }

        let fanout_at = 8;
        let count = u32::from_be_bytes(
            bytes[fanout_at + 255 * 4..fanout_at + 256 * 4]
                .try_into()
                .unwrap(),
        ) as usize;

        let ids_at = fanout_at + 256 * 4;
        let crcs_at = ids_at + count * 20;
        let offsets_at = crcs_at + count * 4;
        let trailer_at = offsets_at + count * 4;
        if trailer_at + 40 != bytes.len() {
            return Err(corrupt("length does not match object count"));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&bytes[ids_at + i * 20..ids_at + (i + 1) * 20]);
            let id = ObjectId::from_bytes(raw);
            if let Some(prev) = entries.last() {
                let prev: &IndexEntry = prev;
                if prev.id >= id {
                    return Err(corrupt("ids not sorted"));
                }
            }
            let crc32 =
                u32::from_be_bytes(bytes[crcs_at + i * 4..crcs_at + (i + 1) * 4].try_into().unwrap());
            let offset = u32::from_be_bytes(
                bytes[offsets_at + i * 4..offsets_at + (i + 1) * 4]
                    .try_into()
                    .unwrap(),
            );
            if offset & 0x8000_0000 != 0 {
                return Err(corrupt("large offset table not supported"));
            }
            entries.push(IndexEntry {
                id,
                offset: offset as u64,
                crc32,
            });
        }

        let mut raw = [0u8; 20];
        raw.copy_from_slice(&bytes[trailer_at..trailer_at + 20]);
        Ok(Self::from_entries(entries, ObjectId::from_bytes(raw)))
    }
}
