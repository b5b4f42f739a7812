use std::path::PathBuf;

use crate::hash::ObjectId;

/// error type for gob operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("path not found in tree: {0}")]
    PathNotFound(String),

    #[error("storage key not found: {0}")]
    KeyNotFound(String),

    #[error("corrupt object: hash mismatch for {0}")]
    CorruptObject(ObjectId),

    #[error("corrupt object: {0}")]
    CorruptObjectMessage(String),

    #[error("corrupt pack: {0}")]
    CorruptPack(String),

    #[error("corrupt pack index: {0}")]
    CorruptPackIndex(String),

    #[error("pack checksum mismatch: expected {expected}, got {actual}")]
    PackChecksumMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("malformed packed-refs line {line}: {reason}")]
    CorruptPackedRefs { line: usize, reason: String },

    #[error("corrupt index file: {0}")]
    CorruptIndex(String),

    #[error("delta size mismatch: expected {expected} base bytes, have {actual}")]
    DeltaSizeMismatch { expected: u64, actual: u64 },

    #[error("delta base not found: {0}")]
    MissingDeltaBase(ObjectId),

    #[error("delta chain too deep (limit {0})")]
    DeltaChainTooDeep(usize),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("symbolic ref chain too deep or cyclic at {0}")]
    SymbolicRefCycle(String),

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("duplicate tree entry name: {0}")]
    DuplicateEntryName(String),

    #[error("invalid file mode: {0:o}")]
    InvalidMode(u32),

    #[error("invalid person identity: {0}")]
    InvalidPerson(String),

    #[error("ref already exists: {0}")]
    RefExists(String),

    #[error("ref {name} changed concurrently: expected {expected:?}")]
    RefConflict {
        name: String,
        expected: Option<ObjectId>,
    },

    #[error("index has unmerged entries")]
    IndexConflict,

    #[error("a pack batch is already in progress")]
    BatchInProgress,

    #[error("pack batch already finalized")]
    BatchFinalized,

    #[error("unsupported pack version: {0}")]
    UnsupportedPackVersion(u32),

    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("unexpected object type: expected {expected}, found {actual}")]
    UnexpectedObjectType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unsupported delta command byte 0")]
    DeltaCommandZero,

    #[error("lock contention on repository")]
    LockContention,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
