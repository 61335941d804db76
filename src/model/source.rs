use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::column::WorkflowType;
use super::identity::Identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: String,
    pub name: String,
}

/// A card table: the board-like container holding the source columns.
#[derive(Debug, Clone)]
pub struct SourceBoard {
    pub id: String,
    pub title: String,
    pub columns: Vec<SourceColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub id: String,
    pub title: String,
    pub color: Option<String>,
    /// Explicit workflow tag from the source, when it provides one.
    pub workflow_type: Option<WorkflowType>,
    pub record_count: u64,
}

#[derive(Debug, Clone)]
pub struct ChecklistItem {
    pub body: String,
    pub completed: bool,
    pub assignee: Option<Identity>,
}

#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    pub completed: bool,
    pub assignees: Vec<Identity>,
    pub checklist: Vec<ChecklistItem>,
    pub comment_count: u64,
    pub column_id: String,
}

#[derive(Debug, Clone)]
pub struct SourceComment {
    pub id: String,
    pub body: String,
    pub author: Identity,
    pub created_at: DateTime<Utc>,
}
