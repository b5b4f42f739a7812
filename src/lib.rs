//! gob - a from-scratch Git object engine
//!
//! a content-addressable object database speaking Git's binary
//! formats: loose objects, pack files with delta compression, the
//! reference namespace, the staging index, ancestry queries, status,
//! and gitignore matching.
//!
//! # Core concepts
//!
//! - **Blob / Tree / Commit / Tag**: the four object types, addressed
//!   by the SHA-1 of their canonical `"type size\0content"` encoding
//! - **Refs**: named pointers, direct or symbolic, loose or packed
//! - **Pack**: compact multi-object file with OFS/REF delta chains
//!   and a sorted sidecar index
//! - **Index**: the staging area, with merge conflict stages 1..3
//! - **Worktree**: the filesystem capability status and checkout run
//!   against
//!
//! # Example usage
//!
//! ```no_run
//! use gob::{History, Repo};
//! use std::path::Path;
//!
//! let repo = Repo::init(Path::new("/path/to/gitdir")).unwrap();
//! let history = History::open(&repo).unwrap();
//!
//! let blob = gob::object::write_blob(&history.odb, b"hello").unwrap();
//! assert!(history.odb.has(&blob).unwrap());
//! ```

mod config;
mod error;
mod hash;
mod repo;

pub mod delta;
pub mod fsck;
pub mod history;
pub mod ignore;
pub mod index;
pub mod object;
pub mod pack;
pub mod refs;
pub mod status;
pub mod storage;
pub mod types;
pub mod worktree;

pub use config::{Config, DeltaConfig, PackConfig, StatusConfig};
pub use error::{Error, IoResultExt, Result};
pub use hash::{hash_object, ObjectHasher, ObjectId, ObjectType, EMPTY_TREE_ID};
pub use history::{History, WalkOptions};
pub use index::{Index, IndexBuilder, IndexEntry};
pub use object::Odb;
pub use refs::{Ref, RefStore, Resolved};
pub use repo::{Repo, RepoLock};
pub use status::{status, RepoStatus, StagedStatus, StatusOptions, UnstagedStatus};
pub use storage::{FsStorage, MemStorage, RawStorage};
pub use types::{Commit, FileMode, Person, Tag, Tree, TreeEntry};
pub use worktree::{FsWorktree, Worktree};
