//! DIRC on-disk index codec (version 2)
//!
//! stage, path, mode, object id, size, and mtime round-trip; stat
//! fields this engine does not track are written as zero.

use std::fs::{self, File};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::ObjectId;
use crate::index::{Index, IndexBuilder, IndexEntry};
use crate::repo::Repo;
use crate::types::FileMode;

const SIGNATURE: &[u8; 4] = b"DIRC";
const VERSION: u32 = 2;

/// serialize an index to the DIRC format
pub fn encode_index(index: &Index) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&(index.len() as u32).to_be_bytes());

    for entry in index.entries() {
        let start = out.len();
        let mtime = entry.mtime.clamp(0, u32::MAX as i64) as u32;
        // ctime mirrors mtime; dev/ino/uid/gid are not tracked
        for word in [mtime, 0, mtime, 0, 0, 0, entry.mode.as_u32(), 0, 0] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&(entry.size.min(u32::MAX as u64) as u32).to_be_bytes());
        out.extend_from_slice(entry.id.as_bytes());

        let name_len = entry.path.len().min(0xfff) as u16;
        let flags = (entry.flags & 0xc000) | ((entry.stage as u16) << 12) | name_len;
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(entry.path.as_bytes());

        // NUL padding to an 8-byte entry boundary, at least one byte
        let used = out.len() - start;
        let padded = (used + 8) / 8 * 8;
        out.resize(start + padded.max(used + 1), 0);
    }

    let digest: [u8; 20] = Sha1::digest(&out).into();
    out.extend_from_slice(&digest);
    out
}

/// parse a DIRC index file
pub fn decode_index(bytes: &[u8]) -> Result<Index> {
    let corrupt = |reason: &str| Error::CorruptIndex(reason.to_string());

    if bytes.len() < 12 + 20 {
        return Err(corrupt("file too short"));
    }
    if &bytes[0..4] != SIGNATURE {
        return Err(corrupt("bad signature"));
    }
    let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(corrupt("unsupported version"));
    }

    let body_len = bytes.len() - 20;
    let digest: [u8; 20] = Sha1::digest(&bytes[..body_len]).into();
    if digest != bytes[body_len..] {
        return Err(corrupt("checksum mismatch"));
    }

    let count = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let mut builder = IndexBuilder::new();
    let mut pos = 12usize;

    for _ in 0..count {
        if pos + 62 > body_len {
            return Err(corrupt("truncated entry"));
        }
        let word = |i: usize| u32::from_be_bytes(bytes[pos + i * 4..pos + (i + 1) * 4].try_into().unwrap());
        let mtime = word(2);
        let mode = FileMode::from_u32(word(6))?;
        let size = word(9) as u64;

        let mut raw = [0u8; 20];
        raw.copy_from_slice(&bytes[pos + 40..pos + 60]);
        let id = ObjectId::from_bytes(raw);

        let flags = u16::from_be_bytes(bytes[pos + 60..pos + 62].try_into().unwrap());
        let stage = ((flags >> 12) & 0x3) as u8;
        let name_len = (flags & 0xfff) as usize;

        let name_at = pos + 62;
        if name_at + name_len > body_len {
            return Err(corrupt("entry name runs past end"));
        }
        let path = std::str::from_utf8(&bytes[name_at..name_at + name_len])
            .map_err(|_| corrupt("entry path not utf-8"))?
            .to_string();

        let mut entry = IndexEntry::new(path, mode, id, stage);
        entry.size = size;
        entry.mtime = mtime as i64;
        entry.flags = flags & 0xc000;
        builder.add(entry);

        // entries are padded with NULs to an 8-byte boundary
        let used = 62 + name_len;
        pos += (used + 8) / 8 * 8;
        if pos > body_len {
            return Err(corrupt("entry padding runs past end"));
        }
    }

    builder.finish()
}

/// load the staging index of a repository; an absent file is an
/// empty index
pub fn load_index(repo: &Repo) -> Result<Index> {
    let path = repo.index_path();
    let (bytes, mtime_ms) = match fs::read(&path) {
        Ok(bytes) => {
            let mtime_ms = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            (bytes, mtime_ms)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Index::new()),
        Err(e) => return Err(Error::Io { path, source: e }),
    };

    let mut index = decode_index(&bytes)?;
    index.set_update_time_ms(mtime_ms);
    Ok(index)
}

/// write the staging index atomically and stamp its update time
pub fn save_index(repo: &Repo, index: &mut Index) -> Result<()> {
    let bytes = encode_index(index);
    let path = repo.index_path();
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(&bytes).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    fs::rename(&tmp_path, &path).with_path(&path)?;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    index.set_update_time_ms(now_ms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{STAGE_OURS, STAGE_THEIRS};
    use tempfile::tempdir;

    fn sample_index() -> Index {
        let blob = ObjectId::from_hex("3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap();
        let mut builder = IndexBuilder::new();
        builder.add(
            IndexEntry::new("README.md", FileMode::Regular, blob, 0).with_stat(42, 1234567890),
        );
        builder.add(IndexEntry::new("bin/run", FileMode::Executable, blob, 0).with_stat(7, 99));
        builder.add(IndexEntry::new("clash.txt", FileMode::Regular, blob, STAGE_OURS));
        builder.add(IndexEntry::new(
            "clash.txt",
            FileMode::Regular,
            blob,
            STAGE_THEIRS,
        ));
        builder.finish().unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let index = sample_index();
        let bytes = encode_index(&index);
        let decoded = decode_index(&bytes).unwrap();

        assert_eq!(decoded.len(), index.len());
        for (a, b) in decoded.entries().iter().zip(index.entries()) {
            assert_eq!(a.path, b.path);
            assert_eq!(a.mode, b.mode);
            assert_eq!(a.id, b.id);
            assert_eq!(a.stage, b.stage);
            assert_eq!(a.size, b.size);
            assert_eq!(a.mtime, b.mtime);
        }
    }

    #[test]
    fn test_signature_and_version() {
        let bytes = encode_index(&Index::new());
        assert_eq!(&bytes[0..4], b"DIRC");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()), 0);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut bytes = encode_index(&sample_index());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(decode_index(&bytes).is_err());

        assert!(decode_index(b"JUNK").is_err());
        assert!(decode_index(b"").is_err());
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();

        // absent file loads as empty
        let empty = load_index(&repo).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.update_time_ms(), 0);

        let mut index = sample_index();
        save_index(&repo, &mut index).unwrap();
        assert!(index.update_time_ms() > 0);

        let loaded = load_index(&repo).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(loaded.update_time_ms() > 0);
        assert!(loaded.has_conflicts());
        assert_eq!(loaded.stage0("README.md").unwrap().size, 42);
    }
}
