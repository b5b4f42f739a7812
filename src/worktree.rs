//! filesystem-facing worktree capability: walking, content I/O,
//! hashing, and tree checkout
//!
//! the engine never touches the OS directly; everything goes through
//! the `Worktree` trait, and `FsWorktree` is its standard unix
//! implementation.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{ObjectHasher, ObjectId, ObjectType};
use crate::ignore::{IgnoreManager, IgnoreNode};
use crate::object::{read_tree, Odb};
use crate::types::FileMode;

/// one worktree entry as seen by status and checkout
#[derive(Clone, Debug)]
pub struct WorktreeEntry {
    /// slash-separated path relative to the worktree root
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub is_ignored: bool,
    pub size: u64,
    /// seconds since epoch
    pub mtime: i64,
    pub mode: FileMode,
}

#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    /// only yield entries under this prefix
    pub path_prefix: Option<String>,
    pub include_ignored: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CheckoutOptions {
    /// overwrite files whose content differs from the target
    pub force: bool,
    /// delete files that are not part of the checked-out tree
    pub remove_untracked: bool,
}

/// per-path outcome of a checkout
#[derive(Clone, Debug, Default)]
pub struct CheckoutReport {
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub conflicts: Vec<String>,
    pub failed: Vec<String>,
}

/// the filesystem capability consumed by status and checkout
pub trait Worktree {
    fn walk(
        &self,
        opts: &WalkOptions,
    ) -> Result<Box<dyn Iterator<Item = Result<WorktreeEntry>> + '_>>;

    fn entry(&self, path: &str) -> Result<Option<WorktreeEntry>>;

    fn exists(&self, path: &str) -> bool;

    fn is_ignored(&self, path: &str) -> bool;

    fn read_content(&self, path: &str) -> Result<Box<dyn Read + '_>>;

    /// blob id the content would get if stored
    fn compute_hash(&self, path: &str) -> Result<ObjectId>;

    fn write_content(&self, path: &str, reader: &mut dyn Read) -> Result<u64>;

    fn remove(&self, path: &str) -> Result<()>;

    fn mkdir(&self, path: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn checkout_tree(
        &self,
        odb: &Odb,
        tree_id: &ObjectId,
        opts: &CheckoutOptions,
    ) -> Result<CheckoutReport>;

    fn checkout_paths(
        &self,
        odb: &Odb,
        tree_id: &ObjectId,
        paths: &[String],
        opts: &CheckoutOptions,
    ) -> Result<CheckoutReport>;
}

/// standard filesystem worktree with hierarchical ignore files
pub struct FsWorktree {
    root: PathBuf,
    ignores: IgnoreManager,
}

impl FsWorktree {
    /// open a worktree root, compiling its .gitignore hierarchy
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let mut worktree = Self {
            root: root.into(),
            ignores: IgnoreManager::new(),
        };
        worktree.refresh_ignores()?;
        Ok(worktree)
    }

    /// install global (user-level) ignore patterns
    pub fn set_global_ignores(&mut self, node: IgnoreNode) {
        self.ignores.set_global(node);
    }

    /// re-scan .gitignore files
    pub fn refresh_ignores(&mut self) -> Result<()> {
        let mut ignores = IgnoreManager::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
        {
            let entry = entry.map_err(walk_err)?;
            if entry.file_type().is_file() && entry.file_name() == ".gitignore" {
                let content =
                    fs::read_to_string(entry.path()).with_path(entry.path())?;
                let dir = entry
                    .path()
                    .parent()
                    .and_then(|p| p.strip_prefix(&self.root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                ignores.add_node(dir, IgnoreNode::parse(&content));
            }
        }
        self.ignores = ignores;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn entry_from_meta(&self, path: String, meta: &fs::Metadata) -> WorktreeEntry {
        let is_symlink = meta.file_type().is_symlink();
        let is_dir = meta.is_dir();
        let mode = if is_symlink {
            FileMode::Symlink
        } else if is_dir {
            FileMode::Tree
        } else if meta.permissions().mode() & 0o111 != 0 {
            FileMode::Executable
        } else {
            FileMode::Regular
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        WorktreeEntry {
            is_ignored: self.ignores.is_ignored(&path, is_dir),
            path,
            is_dir,
            is_symlink,
            size: meta.len(),
            mtime,
            mode,
        }
    }

    fn checkout_filtered(
        &self,
        odb: &Odb,
        tree_id: &ObjectId,
        filter: Option<&[String]>,
        opts: &CheckoutOptions,
    ) -> Result<CheckoutReport> {
        let mut report = CheckoutReport::default();
        let mut wanted: Vec<(String, FileMode, ObjectId)> = Vec::new();
        collect_blobs(odb, tree_id, "", &mut wanted)?;

        if let Some(paths) = filter {
            wanted.retain(|(path, _, _)| {
                paths
                    .iter()
                    .any(|p| path == p || path.starts_with(&format!("{}/", p)))
            });
        }

        for (path, mode, id) in &wanted {
            match self.checkout_one(odb, path, *mode, id, opts) {
                Ok(Outcome::Updated) => report.updated.push(path.clone()),
                Ok(Outcome::Unchanged) => {}
                Ok(Outcome::Conflict) => report.conflicts.push(path.clone()),
                Err(e) => {
                    log::debug!("checkout of {} failed: {}", path, e);
                    report.failed.push(path.clone());
                }
            }
        }

        if opts.remove_untracked && filter.is_none() {
            let tracked: std::collections::HashSet<&str> =
                wanted.iter().map(|(p, _, _)| p.as_str()).collect();
            let walk_opts = WalkOptions::default();
            let entries: Vec<WorktreeEntry> = self
                .walk(&walk_opts)?
                .collect::<Result<Vec<_>>>()?;
            for entry in entries {
                if !entry.is_dir && !tracked.contains(entry.path.as_str()) {
                    match self.remove(&entry.path) {
                        Ok(()) => report.removed.push(entry.path),
                        Err(_) => report.failed.push(entry.path),
                    }
                }
            }
        }

        Ok(report)
    }

    fn checkout_one(
        &self,
        odb: &Odb,
        path: &str,
        mode: FileMode,
        id: &ObjectId,
        opts: &CheckoutOptions,
    ) -> Result<Outcome> {
        if mode == FileMode::Gitlink {
            // submodule placeholder: just the directory
            self.mkdir(path)?;
            return Ok(Outcome::Unchanged);
        }

        if self.exists(path) {
            let current = self.compute_hash(path)?;
            if current == *id {
                return Ok(Outcome::Unchanged);
            }
            if !opts.force {
                return Ok(Outcome::Conflict);
            }
        }

        let content = crate::object::read_blob(odb, id)?.ok_or(Error::ObjectNotFound(*id))?;
        let abs = self.abs(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        match mode {
            FileMode::Symlink => {
                let target = String::from_utf8_lossy(&content).into_owned();
                if abs.exists() || fs::symlink_metadata(&abs).is_ok() {
                    fs::remove_file(&abs).with_path(&abs)?;
                }
                std::os::unix::fs::symlink(&target, &abs).with_path(&abs)?;
            }
            _ => {
                self.write_content(path, &mut content.as_slice())?;
                let perm = if mode == FileMode::Executable { 0o755 } else { 0o644 };
                fs::set_permissions(&abs, fs::Permissions::from_mode(perm)).with_path(&abs)?;
            }
        }
        Ok(Outcome::Updated)
    }
}

enum Outcome {
    Updated,
    Unchanged,
    Conflict,
}

/// flatten a stored tree into (path, mode, id) blobs
fn collect_blobs(
    odb: &Odb,
    tree_id: &ObjectId,
    prefix: &str,
    out: &mut Vec<(String, FileMode, ObjectId)>,
) -> Result<()> {
    let tree = read_tree(odb, tree_id)?.ok_or(Error::ObjectNotFound(*tree_id))?;
    for entry in tree.entries() {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        if entry.mode.is_tree() {
            collect_blobs(odb, &entry.id, &path, out)?;
        } else {
            out.push((path, entry.mode, entry.id));
        }
    }
    Ok(())
}

fn walk_err(e: walkdir::Error) -> Error {
    Error::Io {
        path: e.path().map(Path::to_path_buf).unwrap_or_default(),
        source: e.into(),
    }
}

impl Worktree for FsWorktree {
    fn walk(
        &self,
        opts: &WalkOptions,
    ) -> Result<Box<dyn Iterator<Item = Result<WorktreeEntry>> + '_>> {
        let root = self.root.clone();
        let include_ignored = opts.include_ignored;
        let prefix = opts.path_prefix.clone();

        let iter = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(move |dirent| {
                let dirent = match dirent {
                    Ok(d) => d,
                    Err(e) => return Some(Err(walk_err(e))),
                };
                let rel = dirent
                    .path()
                    .strip_prefix(&root)
                    .expect("walked path under root")
                    .to_string_lossy()
                    .replace('\\', "/");

                if let Some(prefix) = &prefix {
                    let inside = rel.starts_with(prefix.as_str())
                        || prefix.starts_with(&format!("{}/", rel));
                    if !inside {
                        return None;
                    }
                }

                let meta = match fs::symlink_metadata(dirent.path()) {
                    Ok(meta) => meta,
                    Err(e) => {
                        return Some(Err(Error::Io {
                            path: dirent.path().to_path_buf(),
                            source: e,
                        }))
                    }
                };
                let entry = self.entry_from_meta(rel, &meta);
                if entry.is_ignored && !include_ignored {
                    return None;
                }
                Some(Ok(entry))
            });

        Ok(Box::new(iter))
    }

    fn entry(&self, path: &str) -> Result<Option<WorktreeEntry>> {
        let abs = self.abs(path);
        match fs::symlink_metadata(&abs) {
            Ok(meta) => Ok(Some(self.entry_from_meta(path.to_string(), &meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io {
                path: abs,
                source: e,
            }),
        }
    }

    fn exists(&self, path: &str) -> bool {
        fs::symlink_metadata(self.abs(path)).is_ok()
    }

    fn is_ignored(&self, path: &str) -> bool {
        let is_dir = self.abs(path).is_dir();
        self.ignores.is_ignored(path, is_dir)
    }

    fn read_content(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let abs = self.abs(path);
        let meta = fs::symlink_metadata(&abs).with_path(&abs)?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&abs).with_path(&abs)?;
            let bytes = target.to_string_lossy().into_owned().into_bytes();
            return Ok(Box::new(std::io::Cursor::new(bytes)));
        }
        let file = File::open(&abs).with_path(&abs)?;
        Ok(Box::new(file))
    }

    fn compute_hash(&self, path: &str) -> Result<ObjectId> {
        let abs = self.abs(path);
        let meta = fs::symlink_metadata(&abs).with_path(&abs)?;

        if meta.file_type().is_symlink() {
            let target = fs::read_link(&abs).with_path(&abs)?;
            let bytes = target.to_string_lossy().into_owned().into_bytes();
            return Ok(crate::hash::hash_object(ObjectType::Blob, &bytes));
        }

        let mut hasher = ObjectHasher::new(ObjectType::Blob, meta.len());
        let mut file = File::open(&abs).with_path(&abs)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).with_path(&abs)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    fn write_content(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let abs = self.abs(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        let mut file = File::create(&abs).with_path(&abs)?;
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).with_path(&abs)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).with_path(&abs)?;
            total += n as u64;
        }
        Ok(total)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let abs = self.abs(path);
        let meta = fs::symlink_metadata(&abs).with_path(&abs)?;
        if meta.is_dir() {
            fs::remove_dir_all(&abs).with_path(&abs)?;
        } else {
            fs::remove_file(&abs).with_path(&abs)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let abs = self.abs(path);
        fs::create_dir_all(&abs).with_path(&abs)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to_abs = self.abs(to);
        if let Some(parent) = to_abs.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        fs::rename(self.abs(from), &to_abs).with_path(&to_abs)
    }

    fn checkout_tree(
        &self,
        odb: &Odb,
        tree_id: &ObjectId,
        opts: &CheckoutOptions,
    ) -> Result<CheckoutReport> {
        self.checkout_filtered(odb, tree_id, None, opts)
    }

    fn checkout_paths(
        &self,
        odb: &Odb,
        tree_id: &ObjectId,
        paths: &[String],
        opts: &CheckoutOptions,
    ) -> Result<CheckoutReport> {
        self.checkout_filtered(odb, tree_id, Some(paths), opts)
    }
}
