//! aggregate of object database and refs, plus the ancestry engine:
//! breadth-first walks, the ancestor test, and merge bases

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType};
use crate::object::{parse_commit, read_commit, read_tree, Odb};
use crate::refs::RefStore;
use crate::repo::Repo;
use crate::types::{FileMode, Tree};

/// options for an ancestry walk
#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    /// follow only parents[0] of each commit
    pub first_parent_only: bool,
    /// stop after yielding this many commits
    pub limit: Option<usize>,
    /// never enter these commits (nor their ancestors through them)
    pub stop_at: Vec<ObjectId>,
}

/// the immutable side of a working copy: objects plus refs
pub struct History {
    pub odb: Odb,
    pub refs: RefStore,
}

impl History {
    pub fn open(repo: &Repo) -> Result<Self> {
        Ok(Self {
            odb: Odb::open(repo)?,
            refs: RefStore::open(repo),
        })
    }

    pub fn from_parts(odb: Odb, refs: RefStore) -> Self {
        Self { odb, refs }
    }

    /// the tree of a commit
    ///
    /// a missing commit is NotFound; a commit whose tree is gone is a
    /// broken invariant, not a lookup miss.
    pub fn tree_of(&self, commit_id: &ObjectId) -> Result<Tree> {
        let commit =
            read_commit(&self.odb, commit_id)?.ok_or(Error::ObjectNotFound(*commit_id))?;
        read_tree(&self.odb, &commit.tree)?.ok_or_else(|| {
            Error::CorruptObjectMessage(format!(
                "commit {} references missing tree {}",
                commit_id, commit.tree
            ))
        })
    }

    /// parent ids of a commit
    pub fn parents_of(&self, commit_id: &ObjectId) -> Result<Vec<ObjectId>> {
        let commit =
            read_commit(&self.odb, commit_id)?.ok_or(Error::ObjectNotFound(*commit_id))?;
        Ok(commit.parents)
    }

    /// breadth-first walk from a set of starts, deduplicated, FIFO
    /// ties, lazy
    pub fn walk_ancestry(&self, starts: &[ObjectId], opts: WalkOptions) -> AncestryWalk<'_> {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        for start in starts {
            if seen.insert(*start) {
                queue.push_back(*start);
            }
        }
        AncestryWalk {
            history: self,
            queue,
            seen,
            yielded: 0,
            opts,
        }
    }

    /// reflexive ancestor test: a == b, or a reachable from b
    pub fn is_ancestor(&self, a: &ObjectId, b: &ObjectId) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        for id in self.walk_ancestry(&[*b], WalkOptions::default()) {
            if id? == *a {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// all best common ancestors of two commits
    ///
    /// common ancestors that are not themselves ancestors of another
    /// common ancestor; criss-cross histories can produce several.
    /// the result is sorted by id for determinism.
    pub fn find_merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Vec<ObjectId>> {
        if a == b {
            return Ok(vec![*a]);
        }

        let mut ancestors_of_a = HashSet::new();
        for id in self.walk_ancestry(&[*a], WalkOptions::default()) {
            ancestors_of_a.insert(id?);
        }

        // walk from b, collecting the first common commit on each
        // path and not expanding past it
        let mut candidates: Vec<ObjectId> = Vec::new();
        let mut queue = VecDeque::from([*b]);
        let mut seen = HashSet::from([*b]);
        while let Some(id) = queue.pop_front() {
            if ancestors_of_a.contains(&id) {
                if !candidates.contains(&id) {
                    candidates.push(id);
                }
                continue;
            }
            for parent in self.parents_of(&id)? {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }

        // drop candidates dominated by another candidate
        let mut bases = Vec::new();
        'outer: for (i, candidate) in candidates.iter().enumerate() {
            for (j, other) in candidates.iter().enumerate() {
                if i != j && self.is_ancestor(candidate, other)? {
                    continue 'outer;
                }
            }
            bases.push(*candidate);
        }

        bases.sort();
        Ok(bases)
    }

    /// every object reachable from the refs: commits, their trees and
    /// blobs, and annotated tags, including HEAD
    pub fn reachable_objects(&self) -> Result<HashSet<ObjectId>> {
        let mut roots = Vec::new();
        for name in self.refs.list(None)? {
            if let Some(id) = self.refs.resolve(&name)?.object_id {
                roots.push(id);
            }
        }
        if let Some(id) = self.refs.resolve("HEAD")?.object_id {
            roots.push(id);
        }

        let mut reachable = HashSet::new();
        let mut queue: VecDeque<ObjectId> = roots.into();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            let (kind, content) = self
                .odb
                .load(&id)?
                .ok_or(Error::ObjectNotFound(id))?;
            match kind {
                ObjectType::Commit => {
                    let commit = parse_commit(&content)?;
                    queue.push_back(commit.tree);
                    queue.extend(commit.parents);
                }
                ObjectType::Tree => {
                    let tree = crate::object::parse_tree(&content)?;
                    for entry in tree.entries() {
                        // gitlinks point outside this object database
                        if entry.mode != FileMode::Gitlink {
                            queue.push_back(entry.id);
                        }
                    }
                }
                ObjectType::Tag => {
                    let tag = crate::object::parse_tag(&content)?;
                    queue.push_back(tag.object);
                }
                ObjectType::Blob => {}
            }
        }
        Ok(reachable)
    }
}

/// lazy breadth-first ancestry iterator; dropping it stops the walk
pub struct AncestryWalk<'a> {
    history: &'a History,
    queue: VecDeque<ObjectId>,
    seen: HashSet<ObjectId>,
    yielded: usize,
    opts: WalkOptions,
}

impl Iterator for AncestryWalk<'_> {
    type Item = Result<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(limit) = self.opts.limit {
                if self.yielded >= limit {
                    return None;
                }
            }
            let id = self.queue.pop_front()?;
            if self.opts.stop_at.contains(&id) {
                continue;
            }

            let commit = match read_commit(&self.history.odb, &id) {
                Ok(Some(commit)) => commit,
                Ok(None) => return Some(Err(Error::ObjectNotFound(id))),
                Err(e) => return Some(Err(e)),
            };

            let parents: &[ObjectId] = if self.opts.first_parent_only {
                commit.parents.get(..1).unwrap_or(&[])
            } else {
                &commit.parents
            };
            for parent in parents {
                if self.seen.insert(*parent) {
                    self.queue.push_back(*parent);
                }
            }

            self.yielded += 1;
            return Some(Ok(id));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testgraph::{commit_with, mem_odb};
    use super::*;
    use crate::types::Commit;
    use tempfile::tempdir;

    fn fs_history() -> (tempfile::TempDir, History) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        let history = History::open(&repo).unwrap();
        (dir, history)
    }

    fn mem_history() -> (tempfile::TempDir, History) {
        // refs on disk, objects in memory: ancestry tests only touch
        // the odb
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        let refs = RefStore::open(&repo);
        (dir, History::from_parts(mem_odb(), refs))
    }

    fn ids(walk: AncestryWalk<'_>) -> Vec<ObjectId> {
        walk.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_walk_single_commit() {
        let (_dir, history) = mem_history();
        let c1 = commit_with(&history.odb, vec![], "c1");

        let walked = ids(history.walk_ancestry(&[c1], WalkOptions::default()));
        assert_eq!(walked, vec![c1]);
    }

    #[test]
    fn test_walk_linear_chain() {
        let (_dir, history) = mem_history();
        let c1 = commit_with(&history.odb, vec![], "c1");
        let c2 = commit_with(&history.odb, vec![c1], "c2");
        let c3 = commit_with(&history.odb, vec![c2], "c3");

        let walked = ids(history.walk_ancestry(&[c3], WalkOptions::default()));
        assert_eq!(walked, vec![c3, c2, c1]);
    }

    #[test]
    fn test_walk_merge_bfs_order() {
        let (_dir, history) = mem_history();
        let base = commit_with(&history.odb, vec![], "base");
        let left = commit_with(&history.odb, vec![base], "left");
        let right = commit_with(&history.odb, vec![base], "right");
        let merge = commit_with(&history.odb, vec![left, right], "merge");

        let walked = ids(history.walk_ancestry(&[merge], WalkOptions::default()));
        // parents in order, base deduplicated
        assert_eq!(walked, vec![merge, left, right, base]);
    }

    #[test]
    fn test_walk_first_parent_only() {
        let (_dir, history) = mem_history();
        let base = commit_with(&history.odb, vec![], "base");
        let left = commit_with(&history.odb, vec![base], "left");
        let right = commit_with(&history.odb, vec![base], "right");
        let merge = commit_with(&history.odb, vec![left, right], "merge");

        let walked = ids(history.walk_ancestry(
            &[merge],
            WalkOptions {
                first_parent_only: true,
                ..WalkOptions::default()
            },
        ));
        assert_eq!(walked, vec![merge, left, base]);
        assert!(!walked.contains(&right));
    }

    #[test]
    fn test_walk_limit_and_stop_at() {
        let (_dir, history) = mem_history();
        let c1 = commit_with(&history.odb, vec![], "c1");
        let c2 = commit_with(&history.odb, vec![c1], "c2");
        let c3 = commit_with(&history.odb, vec![c2], "c3");

        let limited = ids(history.walk_ancestry(
            &[c3],
            WalkOptions {
                limit: Some(2),
                ..WalkOptions::default()
            },
        ));
        assert_eq!(limited, vec![c3, c2]);

        let stopped = ids(history.walk_ancestry(
            &[c3],
            WalkOptions {
                stop_at: vec![c2],
                ..WalkOptions::default()
            },
        ));
        assert_eq!(stopped, vec![c3]);
    }

    #[test]
    fn test_is_ancestor() {
        let (_dir, history) = mem_history();
        let c1 = commit_with(&history.odb, vec![], "c1");
        let c2 = commit_with(&history.odb, vec![c1], "c2");

        // reflexive
        assert!(history.is_ancestor(&c1, &c1).unwrap());
        // linear: fast-forward test for S2
        assert!(history.is_ancestor(&c1, &c2).unwrap());
        assert!(!history.is_ancestor(&c2, &c1).unwrap());
    }

    #[test]
    fn test_merge_base_simple() {
        let (_dir, history) = mem_history();
        let base = commit_with(&history.odb, vec![], "base");
        let a = commit_with(&history.odb, vec![base], "a");
        let b = commit_with(&history.odb, vec![base], "b");

        assert_eq!(history.find_merge_base(&a, &b).unwrap(), vec![base]);
        // symmetric
        assert_eq!(history.find_merge_base(&b, &a).unwrap(), vec![base]);
    }

    #[test]
    fn test_merge_base_ancestor_fast_path() {
        let (_dir, history) = mem_history();
        let c1 = commit_with(&history.odb, vec![], "c1");
        let c2 = commit_with(&history.odb, vec![c1], "c2");

        assert_eq!(history.find_merge_base(&c1, &c2).unwrap(), vec![c1]);
        assert_eq!(history.find_merge_base(&c2, &c2).unwrap(), vec![c2]);
    }

    #[test]
    fn test_merge_base_criss_cross() {
        let (_dir, history) = mem_history();
        let root = commit_with(&history.odb, vec![], "root");
        let a = commit_with(&history.odb, vec![root], "a");
        let b = commit_with(&history.odb, vec![root], "b");
        // criss-cross merges
        let x = commit_with(&history.odb, vec![a, b], "x");
        let y = commit_with(&history.odb, vec![b, a], "y");
        let tip_x = commit_with(&history.odb, vec![x], "tip-x");
        let tip_y = commit_with(&history.odb, vec![y], "tip-y");

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(
            history.find_merge_base(&tip_x, &tip_y).unwrap(),
            expected
        );
    }

    #[test]
    fn test_merge_base_unrelated_roots() {
        let (_dir, history) = mem_history();
        let a = commit_with(&history.odb, vec![], "island-a");
        let b = commit_with(&history.odb, vec![], "island-b");
        assert!(history.find_merge_base(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn test_tree_of_missing_tree_is_corruption() {
        let (_dir, history) = mem_history();
        // craft a commit pointing at a tree that was never stored
        let ghost_tree = ObjectId::from_hex("1234512345123451234512345123451234512345").unwrap();
        let commit = Commit::new(
            ghost_tree,
            vec![],
            super::testgraph::person(),
            super::testgraph::person(),
            "broken",
        );
        let id = crate::object::write_commit(&history.odb, &commit).unwrap();

        assert!(matches!(
            history.tree_of(&id),
            Err(Error::CorruptObjectMessage(_))
        ));
        assert!(matches!(
            history.tree_of(&ObjectId::ZERO),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_initial_commit_roundtrip() {
        // store a blob, a one-entry tree, and a root commit; point a
        // branch and HEAD at it, then read everything back
        let (_dir, history) = fs_history();

        let blob = crate::object::write_blob(
            &history.odb,
            b"# My Project\n\nWelcome to my first VCS project!",
        )
        .unwrap();
        let tree = crate::object::write_tree(
            &history.odb,
            &Tree::new(vec![crate::types::TreeEntry::new(
                FileMode::Regular,
                "README.md",
                blob,
            )])
            .unwrap(),
        )
        .unwrap();
        let commit = Commit::new(
            tree,
            vec![],
            super::testgraph::person(),
            super::testgraph::person(),
            "Initial commit",
        );
        let commit_id = crate::object::write_commit(&history.odb, &commit).unwrap();

        history.refs.set("refs/heads/main", &commit_id).unwrap();
        history.refs.set_symbolic("HEAD", "refs/heads/main").unwrap();

        assert_eq!(
            history.refs.resolve("HEAD").unwrap().object_id,
            Some(commit_id)
        );
        let walked: Vec<ObjectId> = history
            .walk_ancestry(&[commit_id], WalkOptions::default())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(walked, vec![commit_id]);
        assert_eq!(history.tree_of(&commit_id).unwrap().entries().len(), 1);
        assert_eq!(
            history.tree_of(&commit_id).unwrap().get("README.md").unwrap().id,
            blob
        );
    }

    #[test]
    fn test_reachable_objects() {
        let (_dir, history) = fs_history();

        let blob = crate::object::write_blob(&history.odb, b"reachable content").unwrap();
        let tree = crate::object::write_tree(
            &history.odb,
            &Tree::new(vec![crate::types::TreeEntry::new(
                FileMode::Regular,
                "f.txt",
                blob,
            )])
            .unwrap(),
        )
        .unwrap();
        let commit = Commit::new(
            tree,
            vec![],
            super::testgraph::person(),
            super::testgraph::person(),
            "c",
        );
        let commit_id = crate::object::write_commit(&history.odb, &commit).unwrap();
        history.refs.set("refs/heads/main", &commit_id).unwrap();

        let unreachable = crate::object::write_blob(&history.odb, b"garbage").unwrap();

        let reachable = history.reachable_objects().unwrap();
        assert!(reachable.contains(&commit_id));
        assert!(reachable.contains(&tree));
        assert!(reachable.contains(&blob));
        assert!(!reachable.contains(&unreachable));
    }
}
