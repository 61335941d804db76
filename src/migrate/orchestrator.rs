//! The five-phase migration pipeline, plus resume and retry of failed items.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::duplicates;
use super::transform::{transform_comment, transform_record, TransformedRecord};
use crate::config::{DestinationTarget, RunConfig};
use crate::error::{ApiError, ApiResult, MigrateError, Phase, Result};
use crate::mapping::columns::{map_columns, ColumnReport, ColumnSetup};
use crate::mapping::prompt::{NonInteractive, Prompter};
use crate::mapping::users::{map_users, UserMappingOutcome};
use crate::model::column::ColumnAction;
use crate::model::destination::DestinationBoard;
use crate::model::source::{SourceBoard, SourceColumn, SourceRecord};
use crate::providers::{DestinationProvider, SourceProvider};
use crate::state::store::{RunStateStore, UserMappingStore};
use crate::state::{
    new_run_id, DestinationDescriptor, FailedItem, FailedKind, FailedStage, Metadata, Progress,
    RecordOutcome, RunState, RunStatus, SourceDescriptor,
};

const DRY_RUN_BOARD_ID: &str = "dry-run-board";

/// Summary handed back to the caller after a run, resume or retry.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub dry_run: bool,
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    pub progress: Progress,
    pub metadata: Metadata,
    pub columns: Vec<ColumnReport>,
    pub open_failures: Vec<FailedItem>,
    pub warnings: usize,
    pub duration_secs: i64,
}

impl From<&RunState> for RunReport {
    fn from(state: &RunState) -> Self {
        let end = state.completed_at.unwrap_or(state.updated_at);
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            phase: state.phase,
            dry_run: state.options.dry_run,
            source: state.source.clone(),
            destination: state.destination.clone(),
            progress: state.progress.clone(),
            metadata: state.metadata.clone(),
            columns: state.column_report.clone(),
            open_failures: state.open_failures().map(|(_, item)| item.clone()).collect(),
            warnings: state.warnings.len(),
            duration_secs: (end - state.started_at).num_seconds(),
        }
    }
}

/// Item-level failure text, or the error itself when it must stop the run.
fn item_error(err: ApiError) -> ApiResult<String> {
    if err.is_authentication() {
        Err(err)
    } else {
        Ok(err.to_string())
    }
}

/// Where a failed card stands: not created yet, or created and stopped at
/// `stage` after posting `steps` steps.
struct Progressed {
    destination_id: Option<String>,
    stage: Option<FailedStage>,
    steps: u64,
}

impl Progressed {
    const NOTHING: Progressed = Progressed {
        destination_id: None,
        stage: None,
        steps: 0,
    };

    fn at(card_id: String, stage: FailedStage, steps: u64) -> Self {
        Progressed {
            destination_id: Some(card_id),
            stage: Some(stage),
            steps,
        }
    }
}

fn failed(
    record: &SourceRecord,
    err: ApiError,
    progressed: Progressed,
    warnings: Vec<String>,
) -> ApiResult<RecordOutcome> {
    let error = item_error(err)?;
    warn!("Card {} (\"{}\") failed: {error}", record.id, record.title);
    Ok(RecordOutcome::Failed {
        error,
        destination_id: progressed.destination_id,
        stage: progressed.stage,
        steps: progressed.steps,
        warnings,
    })
}

/// A new board in a dry run exists only as a placeholder.
fn placeholder_board(state: &RunState) -> bool {
    state.options.dry_run && state.destination.created
}

pub struct Orchestrator {
    source: Arc<dyn SourceProvider>,
    destination: Arc<dyn DestinationProvider>,
    store: RunStateStore,
    mappings: UserMappingStore,
    prompter: Box<dyn Prompter>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        destination: Arc<dyn DestinationProvider>,
        store: RunStateStore,
        mappings: UserMappingStore,
    ) -> Self {
        Self {
            source,
            destination,
            store,
            mappings,
            prompter: Box::new(NonInteractive),
        }
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    pub async fn run(&self, config: &RunConfig) -> Result<RunReport> {
        let run_id = new_run_id(Utc::now());
        let _lock = self.store.lock(&run_id)?;
        info!(
            "Starting run {run_id}{}",
            if config.options.dry_run { " (dry run)" } else { "" }
        );

        let (mut state, board) = self
            .discover(run_id, config)
            .await
            .map_err(|e| MigrateError::phase(Phase::Discovery, e))?;
        self.store.save(&state)?;

        state.enter(Phase::ColumnSetup);
        match self.setup_columns(&state, &board.columns).await {
            Ok(setup) => state.apply_column_setup(setup),
            Err(e) => return self.abort(&mut state, MigrateError::phase(Phase::ColumnSetup, e)),
        }
        self.store.save(&state)?;

        state.enter(Phase::UserMapping);
        if state.options.skip_user_mapping {
            info!("Skipping user mapping");
        } else {
            match self.match_people(&state).await {
                Ok(outcome) => {
                    if !state.options.dry_run {
                        if let Err(e) = self.mappings.merge(&outcome.new_mappings) {
                            warn!("Could not persist user mappings: {e}");
                        }
                    }
                    state.apply_user_mappings(&outcome);
                }
                Err(e) if e.is_authentication() => {
                    return self.abort(&mut state, MigrateError::phase(Phase::UserMapping, e));
                }
                Err(e) => {
                    warn!("User mapping skipped: {e}");
                    state.warn(format!("user mapping skipped: {e}"), "user mapping");
                }
            }
        }
        self.store.save(&state)?;

        state.enter(Phase::RecordMigration);
        if let Err(e) = self.migrate_columns(&mut state, &board.columns).await {
            return self.abort(&mut state, e);
        }

        state.finalize();
        self.store.save(&state)?;
        info!(
            "Run {} {}: {} successful, {} failed, {} skipped",
            state.run_id,
            state.status,
            state.progress.successful,
            state.progress.failed,
            state.progress.skipped
        );
        Ok(RunReport::from(&state))
    }

    /// Load a stored run and report where it stands.
    pub fn resume(&self, run_id: &str) -> Result<RunReport> {
        let state = self.store.load(run_id)?;
        info!(
            "Run {run_id} is {} ({} open failures)",
            state.status,
            state.open_failures().count()
        );
        Ok(RunReport::from(&state))
    }

    /// Re-drive the unresolved failures of a stored run with its frozen
    /// column and user mappings.
    pub async fn retry_failed(&self, run_id: &str) -> Result<RunReport> {
        let _lock = self.store.lock(run_id)?;
        let mut state = self.store.load(run_id)?;

        let open: Vec<(usize, FailedItem)> = state
            .open_failures()
            .map(|(index, item)| (index, item.clone()))
            .collect();
        if open.is_empty() {
            info!("Run {run_id} has no open failures");
            return Ok(RunReport::from(&state));
        }

        info!("Retrying {} failed items of run {run_id}", open.len());
        state.reopen();
        if let Err(e) = self.retry_items(&mut state, &open).await {
            return self.abort(&mut state, e);
        }

        state.finalize();
        self.store.save(&state)?;
        info!(
            "Retry of {run_id} finished {}: {} still open",
            state.status,
            state.open_failures().count()
        );
        Ok(RunReport::from(&state))
    }

    fn abort<T>(&self, state: &mut RunState, err: MigrateError) -> Result<T> {
        error!("Run {} failed: {err}", state.run_id);
        state.mark_failed();
        if let Err(save_err) = self.store.save(state) {
            error!("Could not persist failed run {}: {save_err}", state.run_id);
        }
        Err(err)
    }

    async fn discover(
        &self,
        run_id: String,
        config: &RunConfig,
    ) -> ApiResult<(RunState, SourceBoard)> {
        let project = self.source.project(&config.project_id).await?;
        let board = self
            .source
            .board(&config.project_id, &config.card_table_id)
            .await?;

        let (target, created) = match &config.destination {
            DestinationTarget::Existing(id) => (self.destination.board(id).await?, false),
            DestinationTarget::CreateNew(name) if config.options.dry_run => (
                DestinationBoard {
                    id: DRY_RUN_BOARD_ID.into(),
                    name: name.clone(),
                },
                true,
            ),
            DestinationTarget::CreateNew(name) => {
                let created = self.destination.create_board(name).await?;
                info!("Created destination board \"{}\" ({})", created.name, created.id);
                (created, true)
            }
        };

        let total = board.columns.iter().map(|c| c.record_count).sum();
        info!(
            "Discovered {} columns and {total} cards in \"{}\"",
            board.columns.len(),
            board.title
        );

        let mut state = RunState::new(
            run_id,
            SourceDescriptor {
                system: self.source.name().to_string(),
                project_id: project.id,
                project_name: project.name,
                board_id: board.id.clone(),
                board_title: board.title.clone(),
            },
            DestinationDescriptor {
                system: self.destination.name().to_string(),
                board_id: target.id,
                board_name: target.name,
                created,
            },
            config.options.clone(),
            total,
        );
        state.adopt_user_mappings(self.mappings.load());
        Ok((state, board))
    }

    async fn setup_columns(
        &self,
        state: &RunState,
        columns: &[SourceColumn],
    ) -> ApiResult<ColumnSetup> {
        let existing = if placeholder_board(state) {
            Vec::new()
        } else {
            self.destination
                .columns(&state.destination.board_id)
                .await?
        };
        map_columns(
            self.destination.as_ref(),
            &state.destination.board_id,
            columns,
            &existing,
            state.options.dry_run,
        )
        .await
    }

    async fn match_people(&self, state: &RunState) -> ApiResult<UserMappingOutcome> {
        let people = self.source.people(&state.source.project_id).await?;
        let users = self.destination.users().await?;
        Ok(map_users(
            &people,
            &users,
            &state.user_mappings,
            self.prompter.as_ref(),
        ))
    }

    async fn scan_duplicates(&self, state: &mut RunState) -> Result<()> {
        if placeholder_board(state) {
            return Ok(());
        }
        let scan = duplicates::scan(
            self.destination.as_ref(),
            &state.destination.board_id,
            &state.source.system,
        )
        .await
        .map_err(|e| MigrateError::phase(Phase::RecordMigration, e))?;
        if let Some(warning) = scan.warning {
            state.warn(warning, "duplicate scan");
        }
        state.adopt_existing(scan.existing);
        Ok(())
    }

    async fn migrate_columns(&self, state: &mut RunState, columns: &[SourceColumn]) -> Result<()> {
        self.scan_duplicates(state).await?;

        for column in columns {
            let records = match self
                .source
                .records(&state.source.project_id, &column.id)
                .await
            {
                Ok(records) => records,
                Err(e) if e.is_authentication() => {
                    return Err(MigrateError::phase(Phase::RecordMigration, e));
                }
                Err(e) => {
                    warn!("Could not fetch cards of column \"{}\": {e}", column.title);
                    state.record_column_failure(&column.id, &column.title, e.to_string());
                    self.store.save(state)?;
                    continue;
                }
            };
            info!("Column \"{}\": {} cards", column.title, records.len());
            self.migrate_batches(state, &records).await?;
        }
        Ok(())
    }

    /// Process records in source order, checkpointing after each batch.
    async fn migrate_batches(&self, state: &mut RunState, records: &[SourceRecord]) -> Result<()> {
        let batch_size = state.options.batch_size.max(1);
        for batch in records.chunks(batch_size) {
            for record in batch {
                let outcome = self
                    .migrate_record(state, record)
                    .await
                    .map_err(|e| MigrateError::phase(Phase::RecordMigration, e))?;
                state.apply_outcome(&record.id, &record.title, outcome);
            }
            self.store.save(state)?;
            debug!(
                "Checkpoint: {}/{} processed",
                state.progress.processed, state.progress.total
            );
        }
        Ok(())
    }

    fn transform(&self, state: &RunState, record: &SourceRecord) -> TransformedRecord {
        transform_record(
            record,
            &state.source.system,
            &state.column_mappings,
            &state.user_mappings,
            self.destination.supports_step_assignees(),
        )
    }

    /// Migrate one record. Only an authentication failure is returned as an
    /// error; everything else ends up in the outcome.
    async fn migrate_record(
        &self,
        state: &RunState,
        record: &SourceRecord,
    ) -> ApiResult<RecordOutcome> {
        let known = state.existing_records.get(&record.id);
        if known.is_some() && !state.options.update_existing {
            debug!("Skipping {}: already migrated", record.id);
            return Ok(RecordOutcome::AlreadyMigrated);
        }

        let transformed = self.transform(state, record);
        if state.options.dry_run {
            info!(
                "[dry run] would {} \"{}\" ({})",
                if known.is_some() { "update" } else { "create" },
                transformed.card.title,
                transformed.action
            );
            return Ok(RecordOutcome::DryRun {
                warnings: transformed.warnings,
            });
        }

        if let Some(destination_id) = known {
            return match self
                .destination
                .update_record(destination_id, &transformed.card)
                .await
            {
                Ok(()) => {
                    debug!("Updated card {destination_id} from {}", record.id);
                    Ok(RecordOutcome::Updated {
                        destination_id: destination_id.clone(),
                        warnings: transformed.warnings,
                    })
                }
                Err(e) => failed(record, e, Progressed::NOTHING, transformed.warnings),
            };
        }

        let card = match self
            .destination
            .create_record(&state.destination.board_id, &transformed.card)
            .await
        {
            Ok(card) => card,
            Err(e) => return failed(record, e, Progressed::NOTHING, transformed.warnings),
        };
        debug!("Created card {} from {}", card.id, record.id);
        self.finish_record(state, record, transformed, card.id).await
    }

    /// Everything after creation: placement, assignees, steps, closure,
    /// comments. Placement and closure failures fail the record; the rest
    /// become warnings.
    async fn finish_record(
        &self,
        state: &RunState,
        record: &SourceRecord,
        transformed: TransformedRecord,
        card_id: String,
    ) -> ApiResult<RecordOutcome> {
        let TransformedRecord {
            action,
            assignee_ids,
            steps,
            close,
            mut warnings,
            ..
        } = transformed;

        let placed = match &action {
            ColumnAction::KeepTriage => Ok(()),
            ColumnAction::NotNow => self.destination.postpone(&card_id).await,
            ColumnAction::Close => self.destination.close(&card_id).await,
            ColumnAction::PlaceInColumn(column_id) => {
                self.destination.place_in_column(&card_id, column_id).await
            }
        };
        if let Err(e) = placed {
            let progressed = Progressed::at(card_id, FailedStage::Placement, 0);
            return failed(record, e, progressed, warnings);
        }

        for user_id in &assignee_ids {
            if let Err(e) = self.destination.assign(&card_id, user_id).await {
                warnings.push(format!("assigning {user_id} failed: {}", item_error(e)?));
            }
        }

        let mut step_count = 0;
        for step in &steps {
            match self.destination.create_step(&card_id, step).await {
                Ok(()) => step_count += 1,
                Err(e) => {
                    warnings.push(format!("step \"{}\" failed: {}", step.body, item_error(e)?))
                }
            }
        }

        self.close_and_comment(state, record, card_id, close, step_count, warnings)
            .await
    }

    /// The tail of [`Self::finish_record`], and the whole of a retry for a
    /// card that stopped at closure.
    async fn close_and_comment(
        &self,
        state: &RunState,
        record: &SourceRecord,
        card_id: String,
        close: bool,
        steps: u64,
        mut warnings: Vec<String>,
    ) -> ApiResult<RecordOutcome> {
        if close {
            if let Err(e) = self.destination.close(&card_id).await {
                let progressed = Progressed::at(card_id, FailedStage::Closure, steps);
                return failed(record, e, progressed, warnings);
            }
        }

        let comments = if state.options.migrate_comments {
            self.migrate_comments(state, record, &card_id, &mut warnings)
                .await?
        } else {
            0
        };

        Ok(RecordOutcome::Created {
            destination_id: card_id,
            steps,
            comments,
            warnings,
        })
    }

    async fn migrate_comments(
        &self,
        state: &RunState,
        record: &SourceRecord,
        card_id: &str,
        warnings: &mut Vec<String>,
    ) -> ApiResult<u64> {
        if record.comment_count == 0 {
            return Ok(0);
        }
        let comments = match self
            .source
            .comments(&state.source.project_id, &record.id)
            .await
        {
            Ok(comments) => comments,
            Err(e) => {
                warnings.push(format!("comments could not be fetched: {}", item_error(e)?));
                return Ok(0);
            }
        };

        let mut migrated = 0;
        for comment in &comments {
            let payload = transform_comment(comment, &state.user_mappings);
            match self.destination.create_comment(card_id, &payload).await {
                Ok(()) => migrated += 1,
                Err(e) => warnings.push(format!("comment {} failed: {}", comment.id, item_error(e)?)),
            }
        }
        Ok(migrated)
    }

    async fn retry_items(&self, state: &mut RunState, open: &[(usize, FailedItem)]) -> Result<()> {
        self.scan_duplicates(state).await?;

        let batch_size = state.options.batch_size.max(1);
        for batch in open.chunks(batch_size) {
            for (index, item) in batch {
                match item.kind {
                    FailedKind::Card => {
                        let outcome = self
                            .retry_card(state, item)
                            .await
                            .map_err(|e| MigrateError::phase(Phase::RecordMigration, e))?;
                        state.apply_retry(*index, outcome);
                    }
                    FailedKind::Column => self.retry_column(state, *index, item).await?,
                }
            }
            self.store.save(state)?;
        }
        Ok(())
    }

    /// A card created before a later step failed resumes at the stage it
    /// stopped on that same card; anything else goes through the normal path,
    /// which skips cards the scan finds.
    async fn retry_card(&self, state: &RunState, item: &FailedItem) -> ApiResult<RecordOutcome> {
        let record = match self
            .source
            .record(&state.source.project_id, &item.source_id)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                return Ok(RecordOutcome::Failed {
                    error: item_error(e)?,
                    destination_id: item.destination_id.clone(),
                    stage: item.stage,
                    steps: 0,
                    warnings: vec![],
                })
            }
        };

        let Some(card_id) = &item.destination_id else {
            return self.migrate_record(state, &record).await;
        };
        let transformed = self.transform(state, &record);
        if state.options.dry_run {
            return Ok(RecordOutcome::DryRun {
                warnings: transformed.warnings,
            });
        }

        match item.stage {
            Some(FailedStage::Closure) => {
                info!("Closing {} on existing card {card_id}", record.id);
                // Warnings from the first attempt are already recorded.
                self.close_and_comment(
                    state,
                    &record,
                    card_id.clone(),
                    transformed.close,
                    0,
                    Vec::new(),
                )
                .await
            }
            Some(FailedStage::Placement) | None => {
                info!("Resuming {} on existing card {card_id}", record.id);
                self.finish_record(state, &record, transformed, card_id.clone())
                    .await
            }
        }
    }

    async fn retry_column(&self, state: &mut RunState, index: usize, item: &FailedItem) -> Result<()> {
        let records = match self
            .source
            .records(&state.source.project_id, &item.source_id)
            .await
        {
            Ok(records) => records,
            Err(e) if e.is_authentication() => {
                return Err(MigrateError::phase(Phase::RecordMigration, e));
            }
            Err(e) => {
                warn!("Column \"{}\" still unavailable: {e}", item.title);
                return Ok(());
            }
        };
        info!("Column \"{}\": {} cards", item.title, records.len());
        self.migrate_batches(state, &records).await?;
        state.resolve(index);
        Ok(())
    }
}
