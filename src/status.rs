//! three-way status: HEAD tree vs index vs worktree, with
//! racily-clean detection and exact-match rename detection

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::hash::ObjectId;
use crate::history::History;
use crate::index::Index;
use crate::object::read_tree;
use crate::types::FileMode;
use crate::worktree::{WalkOptions, Worktree};

/// index vs HEAD classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagedStatus {
    Added,
    Deleted,
    Modified,
    Unmodified,
    Renamed,
    Conflicted,
}

/// worktree vs index classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnstagedStatus {
    Untracked,
    Ignored,
    Deleted,
    Modified,
    Unmodified,
}

#[derive(Clone, Debug)]
pub struct StatusEntry {
    pub path: String,
    pub staged: Option<StagedStatus>,
    pub unstaged: Option<UnstagedStatus>,
    /// source path of a rename, with its similarity percentage
    pub original_path: Option<String>,
    pub similarity: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct StatusOptions {
    pub detect_renames: bool,
    /// similarity floor; only 100 (exact id match) is implemented
    pub rename_threshold: u8,
    pub path_prefix: Option<String>,
    pub include_ignored: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            detect_renames: true,
            rename_threshold: 100,
            path_prefix: None,
            include_ignored: false,
        }
    }
}

/// the full status of a working copy
#[derive(Clone, Debug, Default)]
pub struct RepoStatus {
    /// per-path entries, sorted by path
    pub entries: Vec<StatusEntry>,
    /// branch HEAD points at, None when detached or unborn
    pub branch: Option<String>,
    pub head: Option<ObjectId>,
    /// worktree paths that could not be read; status continues past
    /// them
    pub failed: Vec<String>,
}

impl RepoStatus {
    pub fn entry(&self, path: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn has_staged(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.staged,
                Some(StagedStatus::Added)
                    | Some(StagedStatus::Deleted)
                    | Some(StagedStatus::Modified)
                    | Some(StagedStatus::Renamed)
            )
        })
    }

    pub fn has_unstaged(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.unstaged,
                Some(UnstagedStatus::Deleted) | Some(UnstagedStatus::Modified)
            )
        })
    }

    pub fn has_untracked(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.unstaged == Some(UnstagedStatus::Untracked))
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.staged == Some(StagedStatus::Conflicted))
    }

    pub fn is_clean(&self) -> bool {
        !self.has_staged() && !self.has_unstaged() && !self.has_untracked() && !self.has_conflicts()
    }
}

/// files whose mtime is within this window of the index write are
/// never trusted by size alone
const RACY_WINDOW_MS: i64 = 3000;

/// compute the three-way status
pub fn status(
    history: &History,
    index: &Index,
    worktree: &dyn Worktree,
    opts: &StatusOptions,
) -> Result<RepoStatus> {
    let mut result = RepoStatus {
        branch: history.refs.current_branch()?,
        head: history.refs.resolve("HEAD")?.object_id,
        ..RepoStatus::default()
    };

    let in_scope = |path: &str| match &opts.path_prefix {
        Some(prefix) => path.starts_with(prefix.as_str()),
        None => true,
    };

    // HEAD tree flattened to path -> (mode, id)
    let mut head_map: BTreeMap<String, (FileMode, ObjectId)> = BTreeMap::new();
    if let Some(head) = &result.head {
        let tree = history.tree_of(head)?;
        let mut stack = vec![(String::new(), tree)];
        while let Some((prefix, tree)) = stack.pop() {
            for entry in tree.entries() {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.mode.is_tree() {
                    let subtree = read_tree(&history.odb, &entry.id)?
                        .ok_or(crate::error::Error::ObjectNotFound(entry.id))?;
                    stack.push((path, subtree));
                } else {
                    head_map.insert(path, (entry.mode, entry.id));
                }
            }
        }
    }

    let conflicted: BTreeSet<String> = index.conflict_paths().into_iter().collect();
    let mut stage0: BTreeMap<&str, &crate::index::IndexEntry> = BTreeMap::new();
    for entry in index.entries() {
        if entry.stage == 0 {
            stage0.insert(entry.path.as_str(), entry);
        }
    }

    // staged column: index vs HEAD
    let mut entries: BTreeMap<String, StatusEntry> = BTreeMap::new();

    for path in conflicted.iter().filter(|p| in_scope(p)) {
        upsert(&mut entries, path).staged = Some(StagedStatus::Conflicted);
    }

    let staged_paths: BTreeSet<&str> = head_map
        .keys()
        .map(String::as_str)
        .chain(stage0.keys().copied())
        .collect();
    for path in staged_paths {
        if !in_scope(path) || conflicted.contains(path) {
            continue;
        }
        let staged = match (head_map.get(path), stage0.get(path)) {
            (None, Some(_)) => StagedStatus::Added,
            (Some(_), None) => StagedStatus::Deleted,
            (Some((head_mode, head_id)), Some(entry)) => {
                if *head_id == entry.id && *head_mode == entry.mode {
                    StagedStatus::Unmodified
                } else {
                    StagedStatus::Modified
                }
            }
            (None, None) => unreachable!("path came from one of the maps"),
        };
        upsert(&mut entries, path).staged = Some(staged);
    }

    // unstaged column: worktree vs index
    let walk_opts = WalkOptions {
        path_prefix: opts.path_prefix.clone(),
        include_ignored: true,
    };
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for walked in worktree.walk(&walk_opts)? {
        let wt_entry = match walked {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("unreadable worktree entry: {}", e);
                result.failed.push(format!("{}", e));
                continue;
            }
        };
        if wt_entry.is_dir || !in_scope(&wt_entry.path) {
            continue;
        }
        seen.insert(wt_entry.path.clone());

        let unstaged = match stage0.get(wt_entry.path.as_str()) {
            None => {
                if conflicted.contains(&wt_entry.path) {
                    // conflicted paths are tracked; the staged column
                    // already reports them
                    continue;
                }
                if wt_entry.is_ignored {
                    if !opts.include_ignored {
                        continue;
                    }
                    UnstagedStatus::Ignored
                } else {
                    UnstagedStatus::Untracked
                }
            }
            Some(indexed) => {
                match classify_tracked(worktree, &wt_entry, indexed, index.update_time_ms()) {
                    Ok(state) => state,
                    Err(e) => {
                        log::debug!("hashing {} failed: {}", wt_entry.path, e);
                        result.failed.push(wt_entry.path.clone());
                        continue;
                    }
                }
            }
        };
        upsert(&mut entries, &wt_entry.path).unstaged = Some(unstaged);
    }

    // tracked but gone from the worktree
    for (path, _) in stage0.iter() {
        if in_scope(path) && !seen.contains(*path) {
            upsert(&mut entries, path).unstaged = Some(UnstagedStatus::Deleted);
        }
    }

    // exact-match rename detection over the staged column
    if opts.detect_renames && opts.rename_threshold == 100 {
        detect_renames(&mut entries, &head_map, &stage0);
    }

    result.entries = entries.into_values().collect();
    Ok(result)
}

fn upsert<'a>(
    entries: &'a mut BTreeMap<String, StatusEntry>,
    path: &str,
) -> &'a mut StatusEntry {
    entries.entry(path.to_string()).or_insert_with(|| StatusEntry {
        path: path.to_string(),
        staged: None,
        unstaged: None,
        original_path: None,
        similarity: None,
    })
}

fn classify_tracked(
    worktree: &dyn Worktree,
    wt_entry: &crate::worktree::WorktreeEntry,
    indexed: &crate::index::IndexEntry,
    index_update_ms: i64,
) -> Result<UnstagedStatus> {
    if wt_entry.mode != indexed.mode {
        return Ok(UnstagedStatus::Modified);
    }

    if wt_entry.size == indexed.size && indexed.size > 0 {
        // trust the stat only for files older than the index write
        let mtime_ms = wt_entry.mtime * 1000;
        if mtime_ms < index_update_ms - RACY_WINDOW_MS {
            return Ok(UnstagedStatus::Unmodified);
        }
    } else if indexed.size > 0 {
        return Ok(UnstagedStatus::Modified);
    }

    // racily clean or unknown stat: compare content
    let actual = worktree.compute_hash(&wt_entry.path)?;
    if actual == indexed.id {
        Ok(UnstagedStatus::Unmodified)
    } else {
        Ok(UnstagedStatus::Modified)
    }
}

fn detect_renames(
    entries: &mut BTreeMap<String, StatusEntry>,
    head_map: &BTreeMap<String, (FileMode, ObjectId)>,
    stage0: &BTreeMap<&str, &crate::index::IndexEntry>,
) {
    let deleted: Vec<String> = entries
        .values()
        .filter(|e| e.staged == Some(StagedStatus::Deleted))
        .map(|e| e.path.clone())
        .collect();
    let added: Vec<String> = entries
        .values()
        .filter(|e| e.staged == Some(StagedStatus::Added))
        .map(|e| e.path.clone())
        .collect();

    let mut used_deletions: BTreeSet<&String> = BTreeSet::new();
    for added_path in &added {
        let added_id = match stage0.get(added_path.as_str()) {
            Some(entry) => entry.id,
            None => continue,
        };
        let matched = deleted.iter().find(|d| {
            !used_deletions.contains(d)
                && head_map.get(d.as_str()).map(|(_, id)| *id) == Some(added_id)
        });
        if let Some(deleted_path) = matched {
            used_deletions.insert(deleted_path);
            if let Some(entry) = entries.get_mut(added_path) {
                entry.staged = Some(StagedStatus::Renamed);
                entry.original_path = Some(deleted_path.clone());
                entry.similarity = Some(100);
            }
            entries.remove(deleted_path);
        }
    }
}
