//! The persisted, resumable state of one migration run.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::MigrationOptions;
use crate::error::Phase;
use crate::mapping::columns::{ColumnReport, ColumnSetup};
use crate::mapping::users::{UserMapping, UserMappingOutcome, UserMappings};
use crate::model::column::ColumnAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::InProgress => f.write_str("in_progress"),
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Partial => f.write_str("partial"),
            RunStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub system: String,
    pub project_id: String,
    pub project_name: String,
    pub board_id: String,
    pub board_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    pub system: String,
    pub board_id: String,
    pub board_name: String,
    #[serde(default)]
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub comments_migrated: u64,
    pub steps_migrated: u64,
    pub columns_created: u64,
    pub users_mapped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedKind {
    Card,
    Column,
}

/// How far a created card got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    /// Placement failed; nothing after it was posted.
    Placement,
    /// Placement, assignees and steps went through; closing did not.
    Closure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub kind: FailedKind,
    pub source_id: String,
    pub title: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the card was created before a later step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailedStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedItem {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// What happened to one source record. Applied to the run state by
/// [`RunState::apply_outcome`], the only place record counters change.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Created {
        destination_id: String,
        steps: u64,
        comments: u64,
        warnings: Vec<String>,
    },
    Updated {
        destination_id: String,
        warnings: Vec<String>,
    },
    AlreadyMigrated,
    DryRun {
        warnings: Vec<String>,
    },
    Failed {
        error: String,
        destination_id: Option<String>,
        stage: Option<FailedStage>,
        /// Steps posted before the failure.
        steps: u64,
        warnings: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    pub options: MigrationOptions,
    pub progress: Progress,
    pub metadata: Metadata,
    #[serde(default)]
    pub column_mappings: HashMap<String, ColumnAction>,
    #[serde(default)]
    pub column_report: Vec<ColumnReport>,
    #[serde(default)]
    pub user_mappings: HashMap<String, UserMapping>,
    /// source record id -> destination record id
    #[serde(default)]
    pub existing_records: HashMap<String, String>,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

/// Time-derived, sortable run identifier.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("run-{}", now.format("%Y%m%d-%H%M%S-%3f"))
}

impl RunState {
    pub fn new(
        run_id: String,
        source: SourceDescriptor,
        destination: DestinationDescriptor,
        options: MigrationOptions,
        total: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::InProgress,
            phase: Phase::Discovery,
            started_at: now,
            updated_at: now,
            completed_at: None,
            source,
            destination,
            options,
            progress: Progress {
                total,
                ..Progress::default()
            },
            metadata: Metadata::default(),
            column_mappings: HashMap::new(),
            column_report: Vec::new(),
            user_mappings: HashMap::new(),
            existing_records: HashMap::new(),
            failed_items: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn warn(&mut self, message: impl Into<String>, context: impl Into<String>) {
        self.warnings.push(Warning {
            message: message.into(),
            context: context.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn apply_column_setup(&mut self, setup: ColumnSetup) {
        self.metadata.columns_created += setup.created.len() as u64;
        self.column_mappings = setup.actions;
        self.column_report = setup.report;
        self.touch();
    }

    /// Merge mappings; a re-mapping replaces the earlier entry.
    pub fn apply_user_mappings(&mut self, outcome: &UserMappingOutcome) {
        for mapping in &outcome.new_mappings {
            self.user_mappings
                .insert(mapping.source_id.clone(), mapping.clone());
        }
        self.metadata.users_mapped = self.user_mappings.len() as u64;
        self.touch();
    }

    /// Seed with mappings confirmed on earlier runs.
    pub fn adopt_user_mappings(&mut self, mappings: UserMappings) {
        for (source_id, mapping) in mappings {
            self.user_mappings.entry(source_id).or_insert(mapping);
        }
        self.metadata.users_mapped = self.user_mappings.len() as u64;
        self.touch();
    }

    /// Merge the duplicate scan; records created by this run take precedence.
    pub fn adopt_existing(&mut self, existing: HashMap<String, String>) {
        for (source_id, destination_id) in existing {
            self.existing_records.entry(source_id).or_insert(destination_id);
        }
        self.touch();
    }

    /// Put a finished run back into record migration for a retry pass.
    pub fn reopen(&mut self) {
        self.status = RunStatus::InProgress;
        self.completed_at = None;
        self.enter(Phase::RecordMigration);
    }

    pub fn resolve(&mut self, index: usize) {
        if let Some(entry) = self.failed_items.get_mut(index) {
            entry.resolved_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn apply_outcome(&mut self, source_id: &str, title: &str, outcome: RecordOutcome) {
        self.progress.processed += 1;
        let context = format!("card {source_id}");
        match outcome {
            RecordOutcome::Created {
                destination_id,
                steps,
                comments,
                warnings,
            } => {
                self.progress.successful += 1;
                self.metadata.steps_migrated += steps;
                self.metadata.comments_migrated += comments;
                self.existing_records
                    .insert(source_id.to_string(), destination_id);
                for w in warnings {
                    self.warn(w, context.clone());
                }
            }
            RecordOutcome::Updated {
                destination_id,
                warnings,
            } => {
                self.progress.successful += 1;
                self.existing_records
                    .insert(source_id.to_string(), destination_id);
                for w in warnings {
                    self.warn(w, context.clone());
                }
            }
            RecordOutcome::AlreadyMigrated => {
                self.progress.skipped += 1;
            }
            RecordOutcome::DryRun { warnings } => {
                self.progress.successful += 1;
                for w in warnings {
                    self.warn(w, context.clone());
                }
            }
            RecordOutcome::Failed {
                error,
                destination_id,
                stage,
                steps,
                warnings,
            } => {
                self.progress.failed += 1;
                self.metadata.steps_migrated += steps;
                for w in warnings {
                    self.warn(w, context.clone());
                }
                self.failed_items.push(FailedItem {
                    kind: FailedKind::Card,
                    source_id: source_id.to_string(),
                    title: title.to_string(),
                    error,
                    timestamp: Utc::now(),
                    destination_id,
                    stage,
                    resolved_at: None,
                });
            }
        }
        self.touch();
    }

    /// Apply the result of retrying a previously failed card. Counters move
    /// from failed to successful/skipped; the failure entry stays in the log,
    /// marked resolved.
    pub fn apply_retry(&mut self, index: usize, outcome: RecordOutcome) {
        let Some(item) = self.failed_items.get(index).cloned() else {
            return;
        };
        match outcome {
            RecordOutcome::Failed {
                error,
                destination_id,
                stage,
                steps,
                warnings,
            } => {
                self.metadata.steps_migrated += steps;
                for w in warnings {
                    self.warn(w, format!("card {}", item.source_id));
                }
                if let Some(entry) = self.failed_items.get_mut(index) {
                    entry.error = error;
                    entry.timestamp = Utc::now();
                    entry.destination_id = destination_id.or(entry.destination_id.take());
                    entry.stage = stage.or(entry.stage);
                }
            }
            other => {
                self.progress.failed = self.progress.failed.saturating_sub(1);
                self.progress.processed = self.progress.processed.saturating_sub(1);
                self.apply_outcome(&item.source_id, &item.title, other);
                if let Some(entry) = self.failed_items.get_mut(index) {
                    entry.resolved_at = Some(Utc::now());
                }
            }
        }
        self.touch();
    }

    pub fn record_column_failure(&mut self, column_id: &str, title: &str, error: String) {
        self.failed_items.push(FailedItem {
            kind: FailedKind::Column,
            source_id: column_id.to_string(),
            title: title.to_string(),
            error,
            timestamp: Utc::now(),
            destination_id: None,
            stage: None,
            resolved_at: None,
        });
        self.touch();
    }

    pub fn open_failures(&self) -> impl Iterator<Item = (usize, &FailedItem)> {
        self.failed_items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_open())
    }

    /// `partial` while any failure is unresolved, otherwise `completed`.
    /// Warnings never affect the status.
    pub fn finalize(&mut self) {
        let open = self.open_failures().count();
        self.status = if self.progress.failed > 0 || open > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        self.phase = Phase::Finalization;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_failed(&mut self) {
        self.status = RunStatus::Failed;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_state() -> RunState {
        RunState::new(
            "run-test".into(),
            SourceDescriptor {
                system: "basecamp".into(),
                project_id: "1".into(),
                project_name: "Launch".into(),
                board_id: "2".into(),
                board_title: "Card Table".into(),
            },
            DestinationDescriptor {
                system: "fizzy".into(),
                board_id: "b".into(),
                board_name: "Launch".into(),
                created: false,
            },
            MigrationOptions::default(),
            3,
        )
    }

    #[test]
    fn run_id_is_time_derived() {
        let at = DateTime::parse_from_rfc3339("2026-10-18T09:30:05.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(new_run_id(at), "run-20261018-093005-123");
    }

    #[test]
    fn outcomes_drive_counters() {
        let mut state = sample_state();
        state.apply_outcome(
            "10",
            "a",
            RecordOutcome::Created {
                destination_id: "1".into(),
                steps: 2,
                comments: 1,
                warnings: vec!["assignee Bo is not mapped".into()],
            },
        );
        state.apply_outcome("11", "b", RecordOutcome::AlreadyMigrated);
        state.apply_outcome(
            "12",
            "c",
            RecordOutcome::Failed {
                error: "HTTP 500".into(),
                destination_id: None,
                stage: None,
                steps: 0,
                warnings: vec![],
            },
        );

        assert_eq!(state.progress.processed, 3);
        assert_eq!(state.progress.successful, 1);
        assert_eq!(state.progress.skipped, 1);
        assert_eq!(state.progress.failed, 1);
        assert_eq!(state.metadata.steps_migrated, 2);
        assert_eq!(state.existing_records.get("10").map(String::as_str), Some("1"));
        assert_eq!(state.warnings.len(), 1);
        assert_eq!(state.failed_items[0].source_id, "12");

        state.finalize();
        assert_eq!(state.status, RunStatus::Partial);
    }

    #[test]
    fn warnings_do_not_make_a_run_partial() {
        let mut state = sample_state();
        state.warn("step failed", "card 1");
        state.finalize();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn successful_retry_resolves_failure() {
        let mut state = sample_state();
        state.apply_outcome(
            "12",
            "c",
            RecordOutcome::Failed {
                error: "HTTP 500".into(),
                destination_id: Some("7".into()),
                stage: Some(FailedStage::Placement),
                steps: 0,
                warnings: vec![],
            },
        );
        state.apply_retry(
            0,
            RecordOutcome::Created {
                destination_id: "7".into(),
                steps: 0,
                comments: 0,
                warnings: vec![],
            },
        );

        assert_eq!(state.progress.failed, 0);
        assert_eq!(state.progress.successful, 1);
        assert_eq!(state.progress.processed, 1);
        assert!(!state.failed_items[0].is_open());
        assert_eq!(state.failed_items.len(), 1);
        state.finalize();
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn failed_retry_keeps_item_open() {
        let mut state = sample_state();
        state.apply_outcome(
            "12",
            "c",
            RecordOutcome::Failed {
                error: "first".into(),
                destination_id: Some("7".into()),
                stage: Some(FailedStage::Placement),
                steps: 0,
                warnings: vec![],
            },
        );
        state.apply_retry(
            0,
            RecordOutcome::Failed {
                error: "second".into(),
                destination_id: Some("7".into()),
                stage: Some(FailedStage::Closure),
                steps: 2,
                warnings: vec![],
            },
        );
        assert!(state.failed_items[0].is_open());
        assert_eq!(state.failed_items[0].error, "second");
        assert_eq!(state.failed_items[0].destination_id.as_deref(), Some("7"));
        assert_eq!(state.failed_items[0].stage, Some(FailedStage::Closure));
        assert_eq!(state.metadata.steps_migrated, 2);
        assert_eq!(state.progress.failed, 1);
    }

    #[test]
    fn scanned_records_never_override_this_runs_cards() {
        let mut state = sample_state();
        state.apply_outcome(
            "10",
            "a",
            RecordOutcome::Created {
                destination_id: "new".into(),
                steps: 0,
                comments: 0,
                warnings: vec![],
            },
        );
        state.adopt_existing(HashMap::from([
            ("10".to_string(), "old".to_string()),
            ("11".to_string(), "7".to_string()),
        ]));
        assert_eq!(state.existing_records["10"], "new");
        assert!(state.existing_records.contains_key("11"));
    }

    #[test]
    fn reopen_clears_completion() {
        let mut state = sample_state();
        state.record_column_failure("c1", "Doing", "HTTP 503".into());
        state.finalize();
        assert_eq!(state.status, RunStatus::Partial);

        state.reopen();
        assert_eq!(state.status, RunStatus::InProgress);
        assert_eq!(state.phase, Phase::RecordMigration);
        assert!(state.completed_at.is_none());

        state.resolve(0);
        state.finalize();
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn user_mappings_merge_last_write_wins() {
        use crate::model::identity::Identity;
        let mut state = sample_state();
        let source = Identity::new("s1", "Ada", None);
        let first = UserMappingOutcome {
            new_mappings: vec![UserMapping::new(&source, &Identity::new("d1", "A", None))],
            ..Default::default()
        };
        let second = UserMappingOutcome {
            new_mappings: vec![UserMapping::new(&source, &Identity::new("d2", "A2", None))],
            ..Default::default()
        };
        state.apply_user_mappings(&first);
        state.apply_user_mappings(&second);
        assert_eq!(state.user_mappings["s1"].destination_id, "d2");
        assert_eq!(state.metadata.users_mapped, 1);
    }
}
