use crate::hash::{ObjectId, ObjectType};
use crate::types::Person;

/// an annotated tag object
///
/// lightweight tags are plain refs and never reach this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// id of the tagged object
    pub object: ObjectId,
    /// type of the tagged object
    pub target_type: ObjectType,
    /// tag name
    pub name: String,
    pub tagger: Person,
    /// raw message bytes
    pub message: Vec<u8>,
}

impl Tag {
    pub fn new(
        object: ObjectId,
        target_type: ObjectType,
        name: impl Into<String>,
        tagger: Person,
        message: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            object,
            target_type,
            name: name.into(),
            tagger,
            message: message.into(),
        }
    }

    /// message as text, replacing invalid UTF-8
    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}
