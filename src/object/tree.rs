//! canonical tree codec: `mode SP name NUL sha1-raw` concatenations

use crate::error::{Error, Result};
use crate::hash::{ObjectId, ObjectType, EMPTY_TREE_ID};
use crate::object::Odb;
use crate::types::{FileMode, Tree, TreeEntry};

/// serialize a tree in canonical form
pub fn encode_tree(tree: &Tree) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in tree.entries() {
        out.extend_from_slice(entry.mode.as_octal_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

/// parse a canonical tree
pub fn parse_tree(bytes: &[u8]) -> Result<Tree> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let space = bytes[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| corrupt("entry lacks mode"))?;
        let mode = std::str::from_utf8(&bytes[pos..pos + space])
            .ok()
            .ok_or_else(|| corrupt("mode not ascii"))
            .and_then(FileMode::parse_octal)?;
        pos += space + 1;

        let nul = bytes[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupt("entry lacks NUL"))?;
        let name = std::str::from_utf8(&bytes[pos..pos + nul])
            .map_err(|_| corrupt("entry name not utf-8"))?
            .to_string();
        pos += nul + 1;

        let raw = bytes
            .get(pos..pos + 20)
            .ok_or_else(|| corrupt("entry id truncated"))?;
        let mut id = [0u8; 20];
        id.copy_from_slice(raw);
        pos += 20;

        entries.push(TreeEntry::new(mode, name, ObjectId::from_bytes(id)));
    }

    Tree::new(entries)
}

fn corrupt(reason: &str) -> Error {
    Error::CorruptObjectMessage(format!("tree: {}", reason))
}

/// store a tree; the empty tree is served virtually and not written
pub fn write_tree(odb: &Odb, tree: &Tree) -> Result<ObjectId> {
    if tree.is_empty() {
        return Ok(EMPTY_TREE_ID);
    }
    odb.store(ObjectType::Tree, &encode_tree(tree))
}

/// load a tree; None when absent
pub fn read_tree(odb: &Odb, id: &ObjectId) -> Result<Option<Tree>> {
    match odb.load(id)? {
        Some((ObjectType::Tree, content)) => Ok(Some(parse_tree(&content)?)),
        Some((other, _)) => Err(Error::UnexpectedObjectType {
            expected: "tree",
            actual: other.as_str(),
        }),
        None => Ok(None),
    }
}

/// look up one entry of a stored tree by name
pub fn tree_entry(odb: &Odb, id: &ObjectId, name: &str) -> Result<Option<TreeEntry>> {
    match read_tree(odb, id)? {
        Some(tree) => Ok(tree.get(name).cloned()),
        None => Ok(None),
    }
}
