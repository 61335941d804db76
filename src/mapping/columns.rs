use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiResult;
use crate::model::column::{ColumnAction, WorkflowType};
use crate::model::destination::{DestinationColumn, NewColumn};
use crate::model::source::SourceColumn;
use crate::providers::DestinationProvider;

/// Source color name to destination theme token.
const COLOR_TOKENS: [(&str, &str); 8] = [
    ("purple", "var(--color-card-1)"),
    ("orange", "var(--color-card-2)"),
    ("blue", "var(--color-card-3)"),
    ("gray", "var(--color-card-4)"),
    ("pink", "var(--color-card-5)"),
    ("yellow", "var(--color-card-6)"),
    ("green", "var(--color-card-7)"),
    ("red", "var(--color-card-8)"),
];

pub const DEFAULT_COLOR_TOKEN: &str = "var(--color-card-default)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No destination column involved.
    Builtin,
    Matched,
    Created,
    /// Dry run: a column would have been created.
    Placeholder,
}

/// One line of the column report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnReport {
    pub source_id: String,
    pub source_title: String,
    pub workflow_type: WorkflowType,
    pub action: ColumnAction,
    pub resolution: Resolution,
    pub record_count: u64,
}

/// Output of column setup, applied to the run state as one delta.
#[derive(Debug, Clone, Default)]
pub struct ColumnSetup {
    pub actions: HashMap<String, ColumnAction>,
    pub report: Vec<ColumnReport>,
    pub created: Vec<DestinationColumn>,
}

/// Explicit tag wins; otherwise infer from the title.
pub fn workflow_type(column: &SourceColumn) -> WorkflowType {
    if let Some(kind) = column.workflow_type {
        return kind;
    }
    let title = column.title.to_lowercase();
    if title.contains("triage") || title.contains("maybe") {
        WorkflowType::Triage
    } else if title.contains("not now") || title.contains("later") {
        WorkflowType::NotNow
    } else if title.contains("done") || title.contains("completed") {
        WorkflowType::Done
    } else {
        WorkflowType::Regular
    }
}

pub fn color_token(color: Option<&str>) -> &'static str {
    let Some(color) = color else {
        return DEFAULT_COLOR_TOKEN;
    };
    let color = color.trim().to_lowercase();
    COLOR_TOKENS
        .iter()
        .find(|(name, _)| *name == color)
        .map(|(_, token)| *token)
        .unwrap_or(DEFAULT_COLOR_TOKEN)
}

/// Fixed action for the special workflow types; `None` for regular columns,
/// which need a destination column.
pub fn builtin_action(kind: WorkflowType) -> Option<ColumnAction> {
    match kind {
        WorkflowType::Triage => Some(ColumnAction::KeepTriage),
        WorkflowType::NotNow => Some(ColumnAction::NotNow),
        WorkflowType::Done => Some(ColumnAction::Close),
        WorkflowType::Regular => None,
    }
}

fn same_title(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Reconcile source columns with the destination board, creating any regular
/// column that has no case-insensitive title match. Creation errors are
/// returned as-is; a half-built column layout is not usable.
pub async fn map_columns(
    destination: &dyn DestinationProvider,
    board_id: &str,
    source_columns: &[SourceColumn],
    existing: &[DestinationColumn],
    dry_run: bool,
) -> ApiResult<ColumnSetup> {
    let mut setup = ColumnSetup::default();
    let mut known: Vec<DestinationColumn> = existing.to_vec();

    for column in source_columns {
        let kind = workflow_type(column);
        let (action, resolution) = match builtin_action(kind) {
            Some(action) => (action, Resolution::Builtin),
            None => {
                let matched = known
                    .iter()
                    .find(|d| same_title(&d.title, &column.title))
                    .map(|d| d.id.clone());
                if let Some(id) = matched {
                    (ColumnAction::PlaceInColumn(id), Resolution::Matched)
                } else if dry_run {
                    let placeholder = DestinationColumn {
                        id: format!("dry-run-{}", column.id),
                        title: column.title.clone(),
                        color: Some(color_token(column.color.as_deref()).to_string()),
                        position: None,
                    };
                    let action = ColumnAction::PlaceInColumn(placeholder.id.clone());
                    known.push(placeholder);
                    (action, Resolution::Placeholder)
                } else {
                    let created = destination
                        .create_column(
                            board_id,
                            &NewColumn {
                                title: column.title.trim().to_string(),
                                color: color_token(column.color.as_deref()).to_string(),
                            },
                        )
                        .await?;
                    info!("Created destination column \"{}\" ({})", created.title, created.id);
                    let action = ColumnAction::PlaceInColumn(created.id.clone());
                    setup.created.push(created.clone());
                    known.push(created);
                    (action, Resolution::Created)
                }
            }
        };

        setup.report.push(ColumnReport {
            source_id: column.id.clone(),
            source_title: column.title.clone(),
            workflow_type: kind,
            action: action.clone(),
            resolution,
            record_count: column.record_count,
        });
        setup.actions.insert(column.id.clone(), action);
    }

    Ok(setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::MockDestination;

    fn column(id: &str, title: &str, kind: Option<WorkflowType>) -> SourceColumn {
        SourceColumn {
            id: id.into(),
            title: title.into(),
            color: None,
            workflow_type: kind,
            record_count: 0,
        }
    }

    #[test]
    fn infers_type_from_title() {
        assert_eq!(workflow_type(&column("1", "Triage", None)), WorkflowType::Triage);
        assert_eq!(workflow_type(&column("1", "Maybe someday", None)), WorkflowType::Triage);
        assert_eq!(workflow_type(&column("1", "Not Now", None)), WorkflowType::NotNow);
        assert_eq!(workflow_type(&column("1", "Do it later", None)), WorkflowType::NotNow);
        assert_eq!(workflow_type(&column("1", "DONE", None)), WorkflowType::Done);
        assert_eq!(workflow_type(&column("1", "Completed work", None)), WorkflowType::Done);
        assert_eq!(workflow_type(&column("1", "In Progress", None)), WorkflowType::Regular);
    }

    #[test]
    fn explicit_tag_beats_title() {
        let col = column("1", "Done-ish", Some(WorkflowType::Regular));
        assert_eq!(workflow_type(&col), WorkflowType::Regular);
    }

    #[test]
    fn color_table() {
        assert_eq!(color_token(Some("purple")), "var(--color-card-1)");
        assert_eq!(color_token(Some(" Red ")), "var(--color-card-8)");
        assert_eq!(color_token(Some("chartreuse")), DEFAULT_COLOR_TOKEN);
        assert_eq!(color_token(None), DEFAULT_COLOR_TOKEN);

        let tokens: std::collections::HashSet<_> = COLOR_TOKENS.iter().map(|(_, t)| t).collect();
        assert_eq!(tokens.len(), 8);
    }

    #[test]
    fn every_workflow_type_yields_one_action() {
        for kind in WorkflowType::ALL {
            let action = builtin_action(kind);
            assert_eq!(action.is_none(), kind == WorkflowType::Regular);
        }
    }

    #[tokio::test]
    async fn reuses_matching_column_and_creates_missing() {
        let destination = MockDestination::new();
        let existing = vec![DestinationColumn {
            id: "d-1".into(),
            title: "  review ".into(),
            color: None,
            position: Some(1),
        }];
        let source = vec![
            column("s-1", "Triage", Some(WorkflowType::Triage)),
            column("s-2", "Review", None),
            column("s-3", "In Progress", None),
            column("s-4", "Done", Some(WorkflowType::Done)),
            column("s-5", "Not now", Some(WorkflowType::NotNow)),
        ];

        let setup = map_columns(&destination, "b-1", &source, &existing, false)
            .await
            .unwrap();

        assert_eq!(setup.actions["s-1"], ColumnAction::KeepTriage);
        assert_eq!(setup.actions["s-2"], ColumnAction::PlaceInColumn("d-1".into()));
        assert_eq!(setup.actions["s-4"], ColumnAction::Close);
        assert_eq!(setup.actions["s-5"], ColumnAction::NotNow);

        assert_eq!(setup.created.len(), 1);
        assert_eq!(setup.created[0].title, "In Progress");
        assert_eq!(
            setup.actions["s-3"],
            ColumnAction::PlaceInColumn(setup.created[0].id.clone())
        );
        assert_eq!(setup.report.len(), 5);
        assert_eq!(setup.report[2].resolution, Resolution::Created);
        assert_eq!(destination.calls_named("create_column"), 1);
    }

    #[tokio::test]
    async fn duplicate_source_titles_create_once() {
        let destination = MockDestination::new();
        let source = vec![column("s-1", "Doing", None), column("s-2", "doing", None)];

        let setup = map_columns(&destination, "b-1", &source, &[], false)
            .await
            .unwrap();

        assert_eq!(setup.created.len(), 1);
        assert_eq!(setup.actions["s-1"], setup.actions["s-2"]);
    }

    #[tokio::test]
    async fn dry_run_uses_placeholder_without_creating() {
        let destination = MockDestination::new();
        let source = vec![column("s-3", "In Progress", None)];

        let setup = map_columns(&destination, "b-1", &source, &[], true)
            .await
            .unwrap();

        assert_eq!(
            setup.actions["s-3"],
            ColumnAction::PlaceInColumn("dry-run-s-3".into())
        );
        assert!(setup.created.is_empty());
        assert_eq!(setup.report[0].resolution, Resolution::Placeholder);
        assert_eq!(destination.calls_named("create_column"), 0);
    }

    #[tokio::test]
    async fn creation_failure_is_returned() {
        let destination = MockDestination::new();
        destination.fail_on("create_column");
        let source = vec![column("s-3", "In Progress", None)];

        let result = map_columns(&destination, "b-1", &source, &[], false).await;
        assert!(result.is_err());
    }
}
