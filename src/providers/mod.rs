pub mod basecamp;
pub mod fizzy;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::ApiResult;
use crate::model::destination::{
    DestinationBoard, DestinationColumn, DestinationRecord, NewCard, NewColumn, NewComment,
    NewStep,
};
use crate::model::identity::Identity;
use crate::model::source::{SourceBoard, SourceComment, SourceProject, SourceRecord};

/// Read-only access to the system records are migrated from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short system name, also used as the duplicate-marker prefix.
    fn name(&self) -> &str;
    async fn project(&self, project_id: &str) -> ApiResult<SourceProject>;
    async fn board(&self, project_id: &str, board_id: &str) -> ApiResult<SourceBoard>;
    /// Every record of one column, in source order, across all pages.
    async fn records(&self, project_id: &str, column_id: &str) -> ApiResult<Vec<SourceRecord>>;
    async fn record(&self, project_id: &str, record_id: &str) -> ApiResult<SourceRecord>;
    async fn comments(&self, project_id: &str, record_id: &str) -> ApiResult<Vec<SourceComment>>;
    async fn people(&self, project_id: &str) -> ApiResult<Vec<Identity>>;
}

/// Create/read/update access to the system records are migrated to.
#[async_trait]
pub trait DestinationProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Whether checklist items can carry their own assignee.
    fn supports_step_assignees(&self) -> bool {
        false
    }
    async fn board(&self, board_id: &str) -> ApiResult<DestinationBoard>;
    async fn create_board(&self, name: &str) -> ApiResult<DestinationBoard>;
    async fn columns(&self, board_id: &str) -> ApiResult<Vec<DestinationColumn>>;
    async fn create_column(&self, board_id: &str, column: &NewColumn) -> ApiResult<DestinationColumn>;
    /// Every card on the board, across all pages.
    async fn records(&self, board_id: &str) -> ApiResult<Vec<DestinationRecord>>;
    async fn create_record(&self, board_id: &str, card: &NewCard) -> ApiResult<DestinationRecord>;
    async fn update_record(&self, record_id: &str, card: &NewCard) -> ApiResult<()>;
    async fn place_in_column(&self, record_id: &str, column_id: &str) -> ApiResult<()>;
    async fn postpone(&self, record_id: &str) -> ApiResult<()>;
    async fn close(&self, record_id: &str) -> ApiResult<()>;
    async fn assign(&self, record_id: &str, user_id: &str) -> ApiResult<()>;
    async fn create_step(&self, record_id: &str, step: &NewStep) -> ApiResult<()>;
    async fn create_comment(&self, record_id: &str, comment: &NewComment) -> ApiResult<()>;
    async fn users(&self) -> ApiResult<Vec<Identity>>;
}


pub fn create_providers(
    config: &AppConfig,
) -> Result<(basecamp::BasecampProvider, fizzy::FizzyProvider)> {
    let source = config
        .basecamp
        .as_ref()
        .context("No [basecamp] section in config.toml")?;
    let destination = config
        .fizzy
        .as_ref()
        .context("No [fizzy] section in config.toml")?;
    let policy = config.migration.retry_policy();

    Ok((
        basecamp::BasecampProvider::new(source, policy.clone()),
        fizzy::FizzyProvider::new(destination, policy),
    ))
}
