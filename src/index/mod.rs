//! the staging index: the source of truth for the next tree, with
//! three-way merge conflict stages

mod file;

pub use file::{decode_index, encode_index, load_index, save_index};

use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::object::{read_tree, write_tree as store_tree, Odb};
use crate::types::{validate_entry_name, FileMode, Tree, TreeEntry};

/// merged/normal entry
pub const STAGE_MERGED: u8 = 0;
/// common ancestor side of a conflict
pub const STAGE_BASE: u8 = 1;
/// our side of a conflict
pub const STAGE_OURS: u8 = 2;
/// their side of a conflict
pub const STAGE_THEIRS: u8 = 3;

/// one staged path at one stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub mode: FileMode,
    pub id: ObjectId,
    pub stage: u8,
    pub size: u64,
    /// worktree mtime in seconds, 0 when unknown
    pub mtime: i64,
    /// assume-valid / extended bits
    pub flags: u16,
}

impl IndexEntry {
    pub fn new(path: impl Into<String>, mode: FileMode, id: ObjectId, stage: u8) -> Self {
        Self {
            path: path.into(),
            mode,
            id,
            stage,
            size: 0,
            mtime: 0,
            flags: 0,
        }
    }

    pub fn with_stat(mut self, size: u64, mtime: i64) -> Self {
        self.size = size;
        self.mtime = mtime;
        self
    }
}

/// entries sorted by path bytes then stage; conflicted iff any entry
/// has a non-zero stage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
    /// wall-clock milliseconds of the last load or save, used for
    /// racily-clean detection
    update_time_ms: i64,
}

fn entry_key(entry: &IndexEntry) -> (&[u8], u8) {
    (entry.path.as_bytes(), entry.stage)
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// all entries, in path+stage order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// entries whose path starts with a prefix, lazily
    pub fn entries_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        self.entries.iter().filter(move |e| e.path.starts_with(prefix))
    }

    pub fn get(&self, path: &str, stage: u8) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| entry_key(e).cmp(&(path.as_bytes(), stage)))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// the merged (stage 0) entry of a path
    pub fn stage0(&self, path: &str) -> Option<&IndexEntry> {
        self.get(path, STAGE_MERGED)
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage != STAGE_MERGED)
    }

    /// paths with any entry above stage 0, deduplicated, in order
    pub fn conflict_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.stage != STAGE_MERGED)
            .map(|e| e.path.clone())
            .collect();
        paths.dedup();
        paths
    }

    /// last write time in wall-clock milliseconds
    pub fn update_time_ms(&self) -> i64 {
        self.update_time_ms
    }

    pub(crate) fn set_update_time_ms(&mut self, ms: i64) {
        self.update_time_ms = ms;
    }

    /// begin an edit; the result replaces this index only when the
    /// editor finishes
    pub fn edit(&self) -> IndexEditor {
        IndexEditor {
            entries: self.entries.clone(),
        }
    }

    /// collapse the stage-0 entries into a tree graph, returning the
    /// root id; refuses while conflicts exist
    pub fn write_tree(&self, odb: &Odb) -> Result<ObjectId> {
        if self.has_conflicts() {
            return Err(Error::IndexConflict);
        }

        let paths: Vec<(&str, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e))
            .collect();
        write_subtree(odb, &paths)
    }

    /// populate a fresh index from a stored tree, all entries at
    /// stage 0
    pub fn read_tree(odb: &Odb, tree_id: &ObjectId) -> Result<Index> {
        let tree = read_tree(odb, tree_id)?.ok_or(Error::ObjectNotFound(*tree_id))?;
        let mut builder = IndexBuilder::new();
        collect_tree(odb, &tree, "", &mut builder)?;
        builder.finish()
    }
}

fn collect_tree(odb: &Odb, tree: &Tree, prefix: &str, builder: &mut IndexBuilder) -> Result<()> {
    for entry in tree.entries() {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        if entry.mode.is_tree() {
            let subtree =
                read_tree(odb, &entry.id)?.ok_or(Error::ObjectNotFound(entry.id))?;
            collect_tree(odb, &subtree, &path, builder)?;
        } else {
            builder.add(IndexEntry::new(path, entry.mode, entry.id, STAGE_MERGED));
        }
    }
    Ok(())
}

/// build one tree level from path-sorted entries
fn write_subtree(odb: &Odb, entries: &[(&str, &IndexEntry)]) -> Result<ObjectId> {
    let mut tree_entries: Vec<TreeEntry> = Vec::new();
    let mut i = 0usize;

    while i < entries.len() {
        let (rel, entry) = entries[i];
        match rel.split_once('/') {
            None => {
                validate_entry_name(rel)?;
                tree_entries.push(TreeEntry::new(entry.mode, rel, entry.id));
                i += 1;
            }
            Some((dir, _)) => {
                // consume the run of paths under this directory
                let start = i;
                let dir_prefix_len = dir.len() + 1;
                while i < entries.len() && entries[i].0.starts_with(dir) && entries[i].0.as_bytes().get(dir.len()) == Some(&b'/') {
                    i += 1;
                }
                let children: Vec<(&str, &IndexEntry)> = entries[start..i]
                    .iter()
                    .map(|(p, e)| (&p[dir_prefix_len..], *e))
                    .collect();
                let subtree_id = write_subtree(odb, &children)?;
                tree_entries.push(TreeEntry::new(FileMode::Tree, dir, subtree_id));
            }
        }
    }

    store_tree(odb, &Tree::new(tree_entries)?)
}

/// constructs an index from scratch by appending entries
#[derive(Default)]
pub struct IndexBuilder {
    entries: Vec<IndexEntry>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: IndexEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// sort, validate uniqueness of (path, stage), and produce the
    /// index
    pub fn finish(mut self) -> Result<Index> {
        self.entries
            .sort_by(|a, b| entry_key(a).cmp(&entry_key(b)));
        for window in self.entries.windows(2) {
            if entry_key(&window[0]) == entry_key(&window[1]) {
                return Err(Error::CorruptIndex(format!(
                    "duplicate entry {} at stage {}",
                    window[0].path, window[0].stage
                )));
            }
        }
        Ok(Index {
            entries: self.entries,
            update_time_ms: 0,
        })
    }
}

/// incremental editor producing a new index on finish
pub struct IndexEditor {
    entries: Vec<IndexEntry>,
}

impl IndexEditor {
    /// upsert an entry
    ///
    /// staging a merged entry resolves the path (stages 1..3 are
    /// dropped); staging a conflict stage drops the merged entry.
    pub fn add(&mut self, entry: IndexEntry) -> &mut Self {
        if entry.stage == STAGE_MERGED {
            self.entries
                .retain(|e| e.path != entry.path || e.stage == STAGE_MERGED);
        } else {
            self.entries
                .retain(|e| e.path != entry.path || e.stage != STAGE_MERGED);
        }
        match self
            .entries
            .binary_search_by(|e| entry_key(e).cmp(&(entry.path.as_bytes(), entry.stage)))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
        self
    }

    /// remove all stages of a path; returns whether anything went
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        before != self.entries.len()
    }

    pub fn finish(self) -> Index {
        Index {
            entries: self.entries,
            update_time_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::write_blob;
    use crate::storage::MemStorage;
    use std::sync::Arc;

    fn mem_odb() -> Odb {
        Odb::with_storage(Arc::new(MemStorage::new()), &Config::default()).unwrap()
    }

    fn blob_id(odb: &Odb, content: &[u8]) -> ObjectId {
        write_blob(odb, content).unwrap()
    }

    fn entry(path: &str, id: ObjectId, stage: u8) -> IndexEntry {
        IndexEntry::new(path, FileMode::Regular, id, stage)
    }

    #[test]
    fn test_builder_sorts_and_rejects_duplicates() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("b.txt", id, 0));
        builder.add(entry("a.txt", id, 0));
        let index = builder.finish().unwrap();

        let paths: Vec<&str> = index.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);

        let mut dup = IndexBuilder::new();
        dup.add(entry("same", id, 0));
        dup.add(entry("same", id, 0));
        assert!(dup.finish().is_err());
    }

    #[test]
    fn test_stage_ordering_within_path() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("conflicted", id, STAGE_THEIRS));
        builder.add(entry("conflicted", id, STAGE_BASE));
        builder.add(entry("conflicted", id, STAGE_OURS));
        let index = builder.finish().unwrap();

        let stages: Vec<u8> = index.entries().iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![1, 2, 3]);
    }

    #[test]
    fn test_conflict_queries() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("clean.txt", id, STAGE_MERGED));
        builder.add(entry("fought.txt", id, STAGE_OURS));
        builder.add(entry("fought.txt", id, STAGE_THEIRS));
        let index = builder.finish().unwrap();

        assert!(index.has_conflicts());
        assert_eq!(index.conflict_paths(), vec!["fought.txt"]);
        assert!(index.stage0("clean.txt").is_some());
        assert!(index.stage0("fought.txt").is_none());
    }

    #[test]
    fn test_editor_resolution_drops_conflict_stages() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("f", id, STAGE_BASE));
        builder.add(entry("f", id, STAGE_OURS));
        builder.add(entry("f", id, STAGE_THEIRS));
        let index = builder.finish().unwrap();

        let mut editor = index.edit();
        editor.add(entry("f", id, STAGE_MERGED));
        let resolved = editor.finish();

        assert!(!resolved.has_conflicts());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.entries()[0].stage, STAGE_MERGED);
    }

    #[test]
    fn test_editor_conflict_drops_merged() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("f", id, STAGE_MERGED));
        let index = builder.finish().unwrap();

        let mut editor = index.edit();
        editor.add(entry("f", id, STAGE_OURS));
        editor.add(entry("f", id, STAGE_THEIRS));
        let conflicted = editor.finish();

        assert!(conflicted.has_conflicts());
        assert!(conflicted.stage0("f").is_none());
        assert_eq!(conflicted.len(), 2);
    }

    #[test]
    fn test_editor_remove() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("keep", id, 0));
        builder.add(entry("drop", id, 0));
        let index = builder.finish().unwrap();

        let mut editor = index.edit();
        assert!(editor.remove("drop"));
        assert!(!editor.remove("drop"));
        let edited = editor.finish();
        assert_eq!(edited.len(), 1);
        assert_eq!(edited.entries()[0].path, "keep");
    }

    #[test]
    fn test_write_tree_read_tree_roundtrip() {
        let odb = mem_odb();
        let readme = blob_id(&odb, b"readme");
        let lib = blob_id(&odb, b"lib source");
        let deep = blob_id(&odb, b"deep");

        let mut builder = IndexBuilder::new();
        builder.add(entry("README.md", readme, 0));
        builder.add(IndexEntry::new("src/lib.rs", FileMode::Regular, lib, 0));
        builder.add(IndexEntry::new(
            "src/nested/deep.rs",
            FileMode::Executable,
            deep,
            0,
        ));
        let index = builder.finish().unwrap();

        let root = index.write_tree(&odb).unwrap();
        let reread = Index::read_tree(&odb, &root).unwrap();

        // law: readTree(writeTree(index)) = index on (mode, path, id)
        let flat: Vec<(&str, FileMode, ObjectId)> = reread
            .entries()
            .iter()
            .map(|e| (e.path.as_str(), e.mode, e.id))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("README.md", FileMode::Regular, readme),
                ("src/lib.rs", FileMode::Regular, lib),
                ("src/nested/deep.rs", FileMode::Executable, deep),
            ]
        );
    }

    #[test]
    fn test_write_tree_refuses_conflicts() {
        let odb = mem_odb();
        let mut builder = IndexBuilder::new();
        builder.add(entry("f", ObjectId::ZERO, STAGE_OURS));
        let index = builder.finish().unwrap();

        assert!(matches!(
            index.write_tree(&odb),
            Err(Error::IndexConflict)
        ));
    }

    #[test]
    fn test_write_tree_empty_index() {
        let odb = mem_odb();
        let index = Index::new();
        let root = index.write_tree(&odb).unwrap();
        assert_eq!(root, crate::hash::EMPTY_TREE_ID);
    }

    #[test]
    fn test_read_tree_of_empty_tree() {
        let odb = mem_odb();
        let index = Index::read_tree(&odb, &crate::hash::EMPTY_TREE_ID).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_entries_with_prefix() {
        let id = ObjectId::ZERO;
        let mut builder = IndexBuilder::new();
        builder.add(entry("src/a.rs", id, 0));
        builder.add(entry("src/b.rs", id, 0));
        builder.add(entry("docs/x.md", id, 0));
        let index = builder.finish().unwrap();

        let src: Vec<&str> = index
            .entries_with_prefix("src/")
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(src, vec!["src/a.rs", "src/b.rs"]);
    }
}
