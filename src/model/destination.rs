use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationBoard {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationColumn {
    pub id: String,
    pub title: String,
    pub color: Option<String>,
    pub position: Option<u32>,
}

/// A card as read back from the destination. `id` is the handle used for
/// every follow-up call (the card number on boards that number cards).
#[derive(Debug, Clone)]
pub struct DestinationRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub title: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCard {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub body: String,
    pub completed: bool,
    pub assignee_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub body: String,
    /// Destination identity of the original author, when mapped.
    pub author_id: Option<String>,
}
