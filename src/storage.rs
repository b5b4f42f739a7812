use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, IoResultExt, Result};

/// a key to byte-stream map with streaming I/O
///
/// keys are slash-separated relative paths ("ab/cdef...",
/// "pack/pack-<hex>.pack"). there are no ordering guarantees across
/// keys; writes to a single key are atomic with respect to readers.
pub trait RawStorage {
    fn has(&self, key: &str) -> Result<bool>;

    /// size of the value under key; KeyNotFound if absent
    fn size(&self, key: &str) -> Result<u64>;

    /// open a reader over the value, optionally starting at `offset`
    /// and bounded to `length` bytes
    fn load(&self, key: &str, offset: u64, length: Option<u64>) -> Result<Box<dyn Read + '_>>;

    /// store a value from a stream, atomically; returns bytes written
    fn store(&self, key: &str, reader: &mut dyn Read) -> Result<u64>;

    /// delete a value; returns whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// lazily list all keys
    fn keys(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>>;
}

/// convenience: read a whole value into memory
pub fn load_bytes(storage: &dyn RawStorage, key: &str) -> Result<Vec<u8>> {
    let mut reader = storage.load(key, 0, None)?;
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .with_path(PathBuf::from(key))?;
    Ok(buf)
}

/// filesystem-backed storage rooted at a directory
///
/// writes go to a temp file first (unique name, fsync), then rename
/// into place and fsync the parent directory.
pub struct FsStorage {
    root: PathBuf,
    tmp: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>, tmp: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp: tmp.into(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn spool_to(&self, tmp_path: &Path, path: &Path, reader: &mut dyn Read) -> Result<u64> {
        let mut written = 0u64;
        {
            let mut tmp_file = File::create(tmp_path).with_path(tmp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf).with_path(tmp_path)?;
                if n == 0 {
                    break;
                }
                tmp_file.write_all(&buf[..n]).with_path(tmp_path)?;
                written += n as u64;
            }
            tmp_file.sync_all().with_path(tmp_path)?;
        }

        fs::rename(tmp_path, path).with_path(path)?;

        if let Some(parent) = path.parent() {
            let dir = File::open(parent).with_path(parent)?;
            dir.sync_all().with_path(parent)?;
        }

        Ok(written)
    }
}

impl RawStorage for FsStorage {
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key).is_file())
    }

    fn size(&self, key: &str) -> Result<u64> {
        let path = self.key_path(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn load(&self, key: &str, offset: u64, length: Option<u64>) -> Result<Box<dyn Read + '_>> {
        let path = self.key_path(key);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::KeyNotFound(key.to_string())
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).with_path(&path)?;
        }

        Ok(match length {
            Some(len) => Box::new(file.take(len)),
            None => Box::new(file),
        })
    }

    fn store(&self, key: &str, reader: &mut dyn Read) -> Result<u64> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        // atomic write: temp -> fsync -> rename -> fsync dir; an
        // abandoned write leaves no torn value behind
        let tmp_path = self.tmp.join(uuid::Uuid::new_v4().to_string());
        let result = self.spool_to(&tmp_path, &path, reader);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn keys(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>> {
        let root = self.root.clone();
        let walker = walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(e) if e.file_type().is_file() => {
                    let rel = e
                        .path()
                        .strip_prefix(&root)
                        .expect("walked path is under root")
                        .to_string_lossy()
                        .into_owned();
                    Some(Ok(rel))
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::Io {
                    path: e.path().map(Path::to_path_buf).unwrap_or_default(),
                    source: e.into(),
                })),
            });
        Ok(Box::new(walker))
    }
}

/// in-memory storage for tests and ephemeral stores
#[derive(Default)]
pub struct MemStorage {
    values: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawStorage for MemStorage {
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }

    fn size(&self, key: &str) -> Result<u64> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .map(|v| v.len() as u64)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    fn load(&self, key: &str, offset: u64, length: Option<u64>) -> Result<Box<dyn Read + '_>> {
        let values = self.values.lock().unwrap();
        let value = values
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        let start = (offset as usize).min(value.len());
        let end = match length {
            Some(len) => (start + len as usize).min(value.len()),
            None => value.len(),
        };
        Ok(Box::new(std::io::Cursor::new(value[start..end].to_vec())))
    }

    fn store(&self, key: &str, reader: &mut dyn Read) -> Result<u64> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .with_path(PathBuf::from(key))?;
        let written = buf.len() as u64;
        self.values.lock().unwrap().insert(key.to_string(), buf);
        Ok(written)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.values.lock().unwrap().remove(key).is_some())
    }

    fn keys(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>> {
        let keys: Vec<String> = self.values.lock().unwrap().keys().cloned().collect();
        Ok(Box::new(keys.into_iter().map(Ok)))
    }
}
