mod commit;
mod person;
mod tag;
mod tree;

pub use commit::Commit;
pub use person::Person;
pub use tag::Tag;
pub use tree::{entry_order, validate_entry_name, FileMode, Tree, TreeEntry};
