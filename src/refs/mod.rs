//! the reference namespace: loose refs, packed refs, symbolic refs,
//! and HEAD semantics

mod packed;

pub use packed::{encode_packed_refs, parse_packed_refs, PackedRef};

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::ObjectId;
use crate::repo::Repo;

/// symbolic chains longer than this are rejected as cyclic
const MAX_SYMBOLIC_DEPTH: usize = 5;

/// a reference is either direct or symbolic
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ref {
    Direct(ObjectId),
    Symbolic(String),
}

/// result of following a symbolic chain to its tip
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// id at the tip, when the tip is a direct ref
    pub object_id: Option<ObjectId>,
    /// every name traversed, starting with the asked-for one
    pub chain: Vec<String>,
}

/// loose + packed reference store rooted at a git directory
pub struct RefStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl RefStore {
    pub fn open(repo: &Repo) -> Self {
        Self {
            root: repo.path().to_path_buf(),
            tmp: repo.tmp_path(),
        }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn packed_path(&self) -> PathBuf {
        self.root.join("packed-refs")
    }

    /// set a direct ref (create or update), atomically
    pub fn set(&self, name: &str, id: &ObjectId) -> Result<()> {
        validate_ref_name(name)?;
        self.write_loose(name, &format!("{}\n", id.to_hex()))
    }

    /// set a symbolic ref, e.g. HEAD -> refs/heads/main
    pub fn set_symbolic(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        validate_ref_name(target)?;
        self.write_loose(name, &format!("ref: {}\n", target))
    }

    /// create a direct ref, failing when it already exists
    pub fn create(&self, name: &str, id: &ObjectId) -> Result<()> {
        if self.get(name)?.is_some() {
            return Err(Error::RefExists(name.to_string()));
        }
        self.set(name, id)
    }

    /// update a direct ref only when its current value matches
    pub fn compare_and_set(
        &self,
        name: &str,
        expected: Option<&ObjectId>,
        id: &ObjectId,
    ) -> Result<()> {
        let current = match self.get(name)? {
            Some(Ref::Direct(current)) => Some(current),
            Some(Ref::Symbolic(_)) | None => None,
        };
        if current.as_ref() != expected {
            return Err(Error::RefConflict {
                name: name.to_string(),
                expected: expected.copied(),
            });
        }
        self.set(name, id)
    }

    fn write_loose(&self, name: &str, content: &str) -> Result<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        // atomic write: temp -> fsync -> rename -> fsync dir
        let tmp_path = self.tmp.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(content.as_bytes()).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)?;
        if let Some(parent) = path.parent() {
            let dir = File::open(parent).with_path(parent)?;
            dir.sync_all().with_path(parent)?;
        }
        Ok(())
    }

    /// read a ref without following symbolic links
    ///
    /// the effective value is the loose file when present, else the
    /// packed entry.
    pub fn get(&self, name: &str) -> Result<Option<Ref>> {
        let path = self.ref_path(name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let line = content.trim_end();
                if let Some(target) = line.strip_prefix("ref: ") {
                    return Ok(Some(Ref::Symbolic(target.trim().to_string())));
                }
                let id = ObjectId::from_hex(&line.to_ascii_lowercase())?;
                Ok(Some(Ref::Direct(id)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.packed_entry(name)?.map(|p| Ref::Direct(p.id)))
            }
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn packed_entry(&self, name: &str) -> Result<Option<PackedRef>> {
        Ok(self
            .packed_refs()?
            .into_iter()
            .find(|p| p.name == name))
    }

    /// all entries of the packed-refs file, empty when absent
    pub fn packed_refs(&self) -> Result<Vec<PackedRef>> {
        let path = self.packed_path();
        match fs::read(&path) {
            Ok(content) => parse_packed_refs(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    /// rewrite the packed-refs file
    pub fn write_packed_refs(&self, refs: &[PackedRef]) -> Result<()> {
        let bytes = encode_packed_refs(refs);
        let path = self.packed_path();
        let tmp_path = self.tmp.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(&bytes).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)?;
        Ok(())
    }

    /// follow the symbolic chain from `name` to its tip
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        let mut chain = vec![name.to_string()];
        let mut current = name.to_string();

        for _ in 0..MAX_SYMBOLIC_DEPTH {
            match self.get(&current)? {
                Some(Ref::Direct(id)) => {
                    return Ok(Resolved {
                        object_id: Some(id),
                        chain,
                    })
                }
                Some(Ref::Symbolic(target)) => {
                    chain.push(target.clone());
                    current = target;
                }
                None => {
                    // unborn branch: the chain is valid, the tip has
                    // no value yet
                    return Ok(Resolved {
                        object_id: None,
                        chain,
                    });
                }
            }
        }

        Err(Error::SymbolicRefCycle(name.to_string()))
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// remove a ref from both the loose and packed layers
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut removed = false;

        let path = self.ref_path(name);
        match fs::remove_file(&path) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io { path, source: e }),
        }

        let packed = self.packed_refs()?;
        if packed.iter().any(|p| p.name == name) {
            let remaining: Vec<PackedRef> =
                packed.into_iter().filter(|p| p.name != name).collect();
            self.write_packed_refs(&remaining)?;
            removed = true;
        }

        Ok(removed)
    }

    /// list ref names under a prefix ("" lists refs/ and the
    /// well-known top-level names), sorted, loose and packed merged
    pub fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let refs_dir = self.root.join("refs");
        if refs_dir.exists() {
            collect_refs(&self.root, &refs_dir, &mut names)?;
        }
        for packed in self.packed_refs()? {
            names.push(packed.name);
        }

        names.sort();
        names.dedup();
        if let Some(prefix) = prefix {
            names.retain(|n| n.starts_with(prefix));
        }
        Ok(names)
    }

    /// list ref names matching a glob pattern
    pub fn list_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = glob::Pattern::new(pattern)
            .map_err(|e| Error::InvalidRefName(e.to_string()))?;
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|n| glob.matches(n))
            .collect())
    }

    /// branch name HEAD points at, None when detached
    pub fn current_branch(&self) -> Result<Option<String>> {
        match self.get("HEAD")? {
            Some(Ref::Symbolic(target)) => {
                Ok(target.strip_prefix("refs/heads/").map(str::to_string))
            }
            _ => Ok(None),
        }
    }
}

/// recursively collect loose ref names relative to the git dir
fn collect_refs(base: &Path, dir: &Path, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        if path.is_dir() {
            collect_refs(base, &path, names)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                names.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

/// validate a ref name against the format's naming rules
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidRefName(format!("{}: {}", reason, name));

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name == "@" {
        return Err(invalid("reserved name"));
    }
    if name.starts_with('-') {
        return Err(invalid("leading dash"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid("leading or trailing slash"));
    }
    if name.ends_with('.') {
        return Err(invalid("trailing dot"));
    }
    if name.contains("..") {
        return Err(invalid("double dot"));
    }
    if name.contains("//") {
        return Err(invalid("double slash"));
    }
    if name.contains("@{") {
        return Err(invalid("reflog syntax"));
    }
    for c in name.chars() {
        if c.is_control() || " ~^:?*[\\".contains(c) {
            return Err(invalid("forbidden character"));
        }
    }
    for component in name.split('/') {
        if component.is_empty() || component.starts_with('.') {
            return Err(invalid("component starts with dot"));
        }
        if component.ends_with(".lock") {
            return Err(invalid("component ends with .lock"));
        }
    }
    Ok(())
}
