//! store verification: re-hash every object, check pack checksums
//! and indexes, and confirm the ref graph is fully connected
//!
//! problems are collected and reported, never fixed in place.

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::hash::{hash_object, ObjectId, ObjectType, EMPTY_TREE_ID};
use crate::history::History;
use crate::object::{parse_commit, parse_tag, parse_tree, read_loose_bytes};
use crate::types::FileMode;

#[derive(Clone, Debug)]
pub enum FsckIssue {
    /// a loose object whose bytes do not hash to its key
    CorruptLoose { id: ObjectId, reason: String },
    /// a pack or its index failed verification
    CorruptPack { checksum: ObjectId, reason: String },
    /// an object referenced by the graph is absent
    Missing { id: ObjectId, referenced_by: String },
}

#[derive(Clone, Debug, Default)]
pub struct FsckReport {
    /// objects examined
    pub checked: usize,
    pub issues: Vec<FsckIssue>,
}

impl FsckReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// verify every loose object, every pack, and the connectivity of
/// the ref graph
pub fn fsck(history: &History) -> Result<FsckReport> {
    let mut report = FsckReport::default();

    // loose objects: content must re-hash to the key
    for id in history.odb.loose_ids()? {
        report.checked += 1;
        match read_loose_bytes(history.odb.storage(), &id) {
            Ok(Some((kind, content))) => {
                let actual = hash_object(kind, &content);
                if actual != id {
                    report.issues.push(FsckIssue::CorruptLoose {
                        id,
                        reason: format!("content hashes to {}", actual),
                    });
                }
            }
            Ok(None) => report.issues.push(FsckIssue::CorruptLoose {
                id,
                reason: "listed but unreadable".to_string(),
            }),
            Err(e) => report.issues.push(FsckIssue::CorruptLoose {
                id,
                reason: e.to_string(),
            }),
        }
    }

    // packs: trailing checksum, per-entry CRC32s, indexed ids
    for pack in history.odb.packs() {
        report.checked += pack.object_count();
        if let Err(e) = pack.verify() {
            report.issues.push(FsckIssue::CorruptPack {
                checksum: pack.checksum(),
                reason: e.to_string(),
            });
        }
    }

    // connectivity from the refs
    connectivity(history, &mut report)?;

    Ok(report)
}

fn connectivity(history: &History, report: &mut FsckReport) -> Result<()> {
    let mut queue: VecDeque<(ObjectId, String)> = VecDeque::new();
    for name in history.refs.list(None)? {
        if let Some(id) = history.refs.resolve(&name)?.object_id {
            queue.push_back((id, name));
        }
    }
    if let Some(id) = history.refs.resolve("HEAD")?.object_id {
        queue.push_back((id, "HEAD".to_string()));
    }

    let mut visited: HashSet<ObjectId> = HashSet::new();
    while let Some((id, referenced_by)) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        if id == EMPTY_TREE_ID {
            continue;
        }

        let loaded = match history.odb.load(&id) {
            Ok(loaded) => loaded,
            Err(Error::MissingDeltaBase(_)) | Err(Error::CorruptPack(_)) => None,
            Err(e) => return Err(e),
        };
        let (kind, content) = match loaded {
            Some(found) => found,
            None => {
                report.issues.push(FsckIssue::Missing { id, referenced_by });
                continue;
            }
        };

        let from = id.to_hex();
        match kind {
            ObjectType::Commit => {
                if let Ok(commit) = parse_commit(&content) {
                    queue.push_back((commit.tree, from.clone()));
                    for parent in commit.parents {
                        queue.push_back((parent, from.clone()));
                    }
                }
            }
            ObjectType::Tree => {
                if let Ok(tree) = parse_tree(&content) {
                    for entry in tree.entries() {
                        if entry.mode != FileMode::Gitlink {
                            queue.push_back((entry.id, from.clone()));
                        }
                    }
                }
            }
            ObjectType::Tag => {
                if let Ok(tag) = parse_tag(&content) {
                    queue.push_back((tag.object, from));
                }
            }
            ObjectType::Blob => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{write_blob, write_commit, write_tree};
    use crate::repo::Repo;
    use crate::types::{Commit, Person, Tree, TreeEntry};
    use std::fs;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, Repo, History) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        let history = History::open(&repo).unwrap();
        (dir, repo, history)
    }

    fn person() -> Person {
        Person::new("Developer", "dev@example.com", 1234567890, "+0000").unwrap()
    }

    fn commit_graph(history: &History) -> ObjectId {
        let blob = write_blob(&history.odb, b"fsck me").unwrap();
        let tree = write_tree(
            &history.odb,
            &Tree::new(vec![TreeEntry::new(FileMode::Regular, "f.txt", blob)]).unwrap(),
        )
        .unwrap();
        let commit = Commit::new(tree, vec![], person(), person(), "ok");
        let id = write_commit(&history.odb, &commit).unwrap();
        history.refs.set("refs/heads/main", &id).unwrap();
        id
    }

    #[test]
    fn test_healthy_store() {
        let (_dir, _repo, history) = fixture();
        commit_graph(&history);

        let report = fsck(&history).unwrap();
        assert!(report.is_healthy(), "{:?}", report.issues);
        assert!(report.checked >= 3);
    }

    #[test]
    fn test_detects_corrupt_loose_object() {
        let (_dir, repo, history) = fixture();
        let blob = write_blob(&history.odb, b"will be damaged").unwrap();

        // flip bytes of the stored file
        let (dir, file) = blob.to_path_components();
        let path = repo.objects_path().join(dir).join(file);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let report = fsck(&history).unwrap();
        assert!(!report.is_healthy());
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, FsckIssue::CorruptLoose { id, .. } if *id == blob)));
    }

    #[test]
    fn test_detects_missing_referenced_object() {
        let (_dir, _repo, history) = fixture();
        let commit_id = commit_graph(&history);

        // delete the blob out from under the commit
        let blob = crate::hash::hash_object(ObjectType::Blob, b"fsck me");
        history.odb.delete(&blob).unwrap();

        let report = fsck(&history).unwrap();
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, FsckIssue::Missing { id, .. } if *id == blob)));
        // the commit itself is still fine
        assert!(history.odb.has(&commit_id).unwrap());
    }

    #[test]
    fn test_empty_repo_is_healthy() {
        let (_dir, _repo, history) = fixture();
        let report = fsck(&history).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.checked, 0);
    }
}
