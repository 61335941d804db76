use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::transform::extract_marker;
use crate::error::ApiResult;
use crate::providers::DestinationProvider;

/// Source record ids already present on the destination board.
#[derive(Debug, Default)]
pub struct DuplicateScan {
    /// source id -> destination id
    pub existing: HashMap<String, String>,
    pub warning: Option<String>,
}

/// Read every card on the board once and collect the markers left by earlier
/// runs. A failed scan yields an empty map and a warning so the run goes on,
/// except for authentication failures, which are returned.
pub async fn scan(
    destination: &dyn DestinationProvider,
    board_id: &str,
    system: &str,
) -> ApiResult<DuplicateScan> {
    let records = match destination.records(board_id).await {
        Ok(records) => records,
        Err(e) if e.is_authentication() => return Err(e),
        Err(e) => {
            warn!("Duplicate scan of board {board_id} failed: {e}");
            return Ok(DuplicateScan {
                existing: HashMap::new(),
                warning: Some(format!(
                    "duplicate scan failed, already migrated cards may be created again: {e}"
                )),
            });
        }
    };

    let mut existing = HashMap::new();
    for record in records {
        if let Some(source_id) = extract_marker(&record.body, system) {
            debug!(
                "Card {} (\"{}\", {}) was migrated from {source_id}",
                record.id,
                record.title,
                record.status.as_deref().unwrap_or("open")
            );
            existing.insert(source_id, record.id);
        }
    }
    info!("Found {} previously migrated cards on board {board_id}", existing.len());

    Ok(DuplicateScan {
        existing,
        warning: None,
    })
}
