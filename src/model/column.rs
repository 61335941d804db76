use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic role of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Triage,
    NotNow,
    Done,
    Regular,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 4] = [
        WorkflowType::Triage,
        WorkflowType::NotNow,
        WorkflowType::Done,
        WorkflowType::Regular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Triage => "triage",
            WorkflowType::NotNow => "not_now",
            WorkflowType::Done => "done",
            WorkflowType::Regular => "regular",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination-side placement for every record of one source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "column_id", rename_all = "snake_case")]
pub enum ColumnAction {
    KeepTriage,
    NotNow,
    Close,
    PlaceInColumn(String),
}

impl fmt::Display for ColumnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnAction::KeepTriage => f.write_str("keep in triage"),
            ColumnAction::NotNow => f.write_str("not now"),
            ColumnAction::Close => f.write_str("close"),
            ColumnAction::PlaceInColumn(id) => write!(f, "place in column {id}"),
        }
    }
}
