use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::hash::ObjectId;

/// file mode of a tree entry, restricted to the modes the format knows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileMode {
    Tree,
    Regular,
    Executable,
    Symlink,
    Gitlink,
}

impl FileMode {
    /// parse from the octal mode value
    pub fn from_u32(mode: u32) -> Result<Self> {
        match mode {
            0o040000 => Ok(FileMode::Tree),
            0o100644 => Ok(FileMode::Regular),
            0o100755 => Ok(FileMode::Executable),
            0o120000 => Ok(FileMode::Symlink),
            0o160000 => Ok(FileMode::Gitlink),
            other => Err(Error::InvalidMode(other)),
        }
    }

    /// octal mode value
    pub fn as_u32(&self) -> u32 {
        match self {
            FileMode::Tree => 0o040000,
            FileMode::Regular => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::Symlink => 0o120000,
            FileMode::Gitlink => 0o160000,
        }
    }

    /// canonical mode string, without leading zeros ("40000", "100644", ...)
    pub fn as_octal_str(&self) -> &'static str {
        match self {
            FileMode::Tree => "40000",
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
            FileMode::Gitlink => "160000",
        }
    }

    /// parse a canonical mode string
    pub fn parse_octal(s: &str) -> Result<Self> {
        let value = u32::from_str_radix(s, 8).map_err(|_| Error::InvalidMode(0))?;
        Self::from_u32(value)
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, FileMode::Tree)
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, FileMode::Executable)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_octal_str())
    }
}

/// a single entry in a tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }
}

/// ordering quirk of the canonical format: entries sort as if
/// directory names carried a trailing '/'
pub fn entry_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_bytes = a.name.as_bytes();
    let b_bytes = b.name.as_bytes();
    let common = a_bytes.len().min(b_bytes.len());

    match a_bytes[..common].cmp(&b_bytes[..common]) {
        Ordering::Equal => {}
        other => return other,
    }

    let a_next = a_bytes
        .get(common)
        .copied()
        .or(if a.mode.is_tree() { Some(b'/') } else { None });
    let b_next = b_bytes
        .get(common)
        .copied()
        .or(if b.mode.is_tree() { Some(b'/') } else { None });

    match (a_next, b_next) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| {
            // names share a prefix beyond both lengths only via the
            // virtual slash; longer one sorts later
            a_bytes.len().cmp(&b_bytes.len())
        }),
    }
}

/// a directory tree: entries sorted in canonical order, names unique
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a new tree, validating names and sorting entries
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
        }

        entries.sort_by(entry_order);

        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(Error::DuplicateEntryName(window[0].name.clone()));
            }
        }

        Ok(Self { entries })
    }

    /// create an empty tree
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// get entries slice, in canonical order
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// consume and return entries
    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// look up entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// is tree empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// validate an entry name
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidEntryName(format!(
            "name contains '/': {}",
            name
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidEntryName(format!("reserved name: {}", name)));
    }
    Ok(())
}
