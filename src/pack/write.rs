//! incremental pack builder with a sliding delta-base window

use std::collections::{HashSet, VecDeque};
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use crate::config::DeltaConfig;
use crate::delta::{acceptable, build_delta, codec};
use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::pack::{write_entry_header, EntryKind, PACK_SIGNATURE};

/// where the builder gets object content from
pub trait ObjectSource {
    fn load_object(&self, id: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>>;
}

/// progress counters, filled as entries are added and finalized
#[derive(Clone, Copy, Debug, Default)]
pub struct PackStats {
    pub total_objects: usize,
    pub deltified: usize,
    pub bytes_written: u64,
    pub bytes_saved: u64,
}

struct BuiltEntry {
    kind: EntryKind,
    /// REF_DELTA base, present iff kind is RefDelta
    base: Option<ObjectId>,
    /// uncompressed payload length (content or delta instructions)
    size: u64,
    compressed: Vec<u8>,
}

struct WindowEntry {
    id: ObjectId,
    kind: ObjectType,
    content: Vec<u8>,
}

/// builds one pack: entries accumulate in memory compressed, the
/// window keeps recent objects as delta base candidates, and
/// `finalize` streams header, entries, and the trailing checksum
pub struct PackBuilder<'a> {
    source: &'a dyn ObjectSource,
    delta_config: DeltaConfig,
    window_size: usize,
    window: VecDeque<WindowEntry>,
    added: HashSet<ObjectId>,
    entries: Vec<BuiltEntry>,
    stats: PackStats,
    finalized: bool,
}

impl<'a> PackBuilder<'a> {
    pub fn new(source: &'a dyn ObjectSource, delta_config: DeltaConfig, window_size: usize) -> Self {
        Self {
            source,
            delta_config,
            window_size,
            window: VecDeque::new(),
            added: HashSet::new(),
            entries: Vec::new(),
            stats: PackStats::default(),
            finalized: false,
        }
    }

    pub fn stats(&self) -> PackStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// add an object as a full (non-delta) entry
    pub fn add_object(&mut self, id: &ObjectId) -> Result<()> {
        let (kind, content) = self.fetch(id)?;
        if self.added.contains(id) {
            return Ok(());
        }
        self.push_full(*id, kind, content);
        Ok(())
    }

    /// add an object, deltifying against the preferred base or the
    /// best same-type window entry when the delta is worth it
    pub fn add_object_with_delta(
        &mut self,
        id: &ObjectId,
        preferred_base: Option<&ObjectId>,
    ) -> Result<()> {
        let (kind, content) = self.fetch(id)?;
        if self.added.contains(id) {
            return Ok(());
        }

        let mut best: Option<(ObjectId, Vec<u8>)> = None;

        let mut consider = |base_id: ObjectId, base: &[u8]| {
            let delta = build_delta(base, &content, self.delta_config.block_size);
            if !acceptable(&delta, content.len(), &self.delta_config) {
                return;
            }
            let encoded = codec::encode(&delta);
            if best
                .as_ref()
                .map_or(true, |(_, prev)| encoded.len() < prev.len())
            {
                best = Some((base_id, encoded));
            }
        };

        if let Some(base_id) = preferred_base {
            if base_id != id {
                if let Some((base_kind, base)) = self.source.load_object(base_id)? {
                    // deltas only relate objects of the same type
                    if base_kind == kind {
                        consider(*base_id, &base);
                    }
                }
            }
        }

        for candidate in self.window.iter().rev() {
            if candidate.kind == kind && candidate.id != *id {
                consider(candidate.id, &candidate.content);
            }
        }

        match best {
            Some((base_id, encoded)) => {
                log::trace!("deltified {} against {}", id, base_id);
                self.stats.deltified += 1;
                self.stats.bytes_saved += content.len() as u64 - encoded.len() as u64;
                self.push_entry(
                    *id,
                    BuiltEntry {
                        kind: EntryKind::RefDelta,
                        base: Some(base_id),
                        size: encoded.len() as u64,
                        compressed: deflate(&encoded),
                    },
                );
                self.push_window(*id, kind, content);
            }
            None => self.push_full(*id, kind, content),
        }
        Ok(())
    }

    fn fetch(&self, id: &ObjectId) -> Result<(ObjectType, Vec<u8>)> {
        if self.finalized {
            return Err(Error::BatchFinalized);
        }
        self.source
            .load_object(id)?
            .ok_or(Error::ObjectNotFound(*id))
    }

    fn push_full(&mut self, id: ObjectId, kind: ObjectType, content: Vec<u8>) {
        self.push_entry(
            id,
            BuiltEntry {
                kind: EntryKind::from_object_type(kind),
                base: None,
                size: content.len() as u64,
                compressed: deflate(&content),
            },
        );
        self.push_window(id, kind, content);
    }

    fn push_entry(&mut self, id: ObjectId, entry: BuiltEntry) {
        self.entries.push(entry);
        self.added.insert(id);
        self.stats.total_objects += 1;
    }

    fn push_window(&mut self, id: ObjectId, kind: ObjectType, content: Vec<u8>) {
        self.window.push_back(WindowEntry { id, kind, content });
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
    }

    /// stream the full pack; may be called at most once
    pub fn finalize(&mut self, out: &mut dyn Write) -> Result<(PackStats, ObjectId)> {
        if self.finalized {
            return Err(Error::BatchFinalized);
        }
        self.finalized = true;

        let mut writer = HashingWriter {
            inner: out,
            hasher: Sha1::new(),
            written: 0,
        };

        writer.write_all(PACK_SIGNATURE)?;
        writer.write_all(&2u32.to_be_bytes())?;
        writer.write_all(&(self.entries.len() as u32).to_be_bytes())?;

        for entry in &self.entries {
            let mut header = Vec::with_capacity(32);
            write_entry_header(&mut header, entry.kind, entry.size);
            writer.write_all(&header)?;
            if let Some(base) = &entry.base {
                writer.write_all(base.as_bytes())?;
            }
            writer.write_all(&entry.compressed)?;
        }

        let checksum = ObjectId::from_bytes(writer.hasher.clone().finalize().into());
        writer.inner.write_all(checksum.as_bytes()).map_err(io_err)?;
        self.stats.bytes_written = writer.written + 20;

        Ok((self.stats, checksum))
    }
}

fn deflate(content: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).expect("vec write cannot fail");
    encoder.finish().expect("vec write cannot fail")
}

fn io_err(source: std::io::Error) -> Error {
    Error::Io {
        path: "<pack>".into(),
        source,
    }
}

struct HashingWriter<'a> {
    inner: &'a mut dyn Write,
    hasher: Sha1,
    written: u64,
}

impl HashingWriter<'_> {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf).map_err(io_err)?;
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }
}
