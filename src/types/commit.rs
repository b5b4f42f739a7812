use crate::hash::ObjectId;
use crate::types::Person;

/// a commit object pointing to a tree with identity and message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// root tree id
    pub tree: ObjectId,
    /// parent commit ids (empty for root, 1 for linear, 2+ for merge)
    pub parents: Vec<ObjectId>,
    pub author: Person,
    pub committer: Person,
    /// raw message bytes; usually but not necessarily UTF-8
    pub message: Vec<u8>,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Person,
        committer: Person,
        message: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            message: message.into(),
        }
    }

    /// is this a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// is this a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// message as text, replacing invalid UTF-8
    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }

    /// first line of the message
    pub fn summary(&self) -> String {
        self.message_text()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Person {
        Person::new("Developer", "dev@example.com", 1234567890, "+0000").unwrap()
    }

    #[test]
    fn test_commit_new() {
        let c = Commit::new(
            ObjectId::ZERO,
            vec![],
            person(),
            person(),
            "Initial commit",
        );
        assert_eq!(c.tree, ObjectId::ZERO);
        assert!(c.parents.is_empty());
        assert!(c.is_root());
        assert!(!c.is_merge());
        assert_eq!(c.message_text(), "Initial commit");
    }

    #[test]
    fn test_commit_with_parent() {
        let parent = ObjectId::from_hex("abcdef0123456789abcdef0123456789abcdef01").unwrap();
        let c = Commit::new(ObjectId::ZERO, vec![parent], person(), person(), "child");
        assert!(!c.is_root());
        assert!(!c.is_merge());
    }

    #[test]
    fn test_commit_merge() {
        let p1 = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
        let p2 = ObjectId::from_hex("2222222222222222222222222222222222222222").unwrap();
        let c = Commit::new(ObjectId::ZERO, vec![p1, p2], person(), person(), "merge");
        assert!(c.is_merge());
    }

    #[test]
    fn test_commit_summary() {
        let c = Commit::new(
            ObjectId::ZERO,
            vec![],
            person(),
            person(),
            "short summary\n\nlong body here",
        );
        assert_eq!(c.summary(), "short summary");
    }
}
