use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prompt::Prompter;
use crate::model::identity::Identity;

/// A confirmed link between a source person and a destination person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_email: Option<String>,
    pub source_name: String,
    pub destination_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_email: Option<String>,
    pub destination_name: String,
    pub mapped_at: DateTime<Utc>,
}

impl UserMapping {
    pub fn new(source: &Identity, destination: &Identity) -> Self {
        Self {
            source_id: source.id.clone(),
            source_email: source.email.clone(),
            source_name: source.name.clone(),
            destination_id: destination.id.clone(),
            destination_email: destination.email.clone(),
            destination_name: destination.name.clone(),
            mapped_at: Utc::now(),
        }
    }
}

pub type UserMappings = HashMap<String, UserMapping>;

/// Result of the user mapping phase.
#[derive(Debug, Clone, Default)]
pub struct UserMappingOutcome {
    /// Mappings made during this call.
    pub new_mappings: Vec<UserMapping>,
    /// Already mapped on an earlier run.
    pub reused: usize,
    pub skipped: Vec<Identity>,
}

impl UserMappingOutcome {
    pub fn mapped_count(&self) -> usize {
        self.new_mappings.len() + self.reused
    }
}

/// Match source people to destination people by normalized email, asking the
/// prompter where a human decision is needed. People mapped on an earlier
/// run are left alone.
pub fn map_users(
    sources: &[Identity],
    destinations: &[Identity],
    existing: &UserMappings,
    prompter: &dyn Prompter,
) -> UserMappingOutcome {
    let mut outcome = UserMappingOutcome::default();

    for source in sources {
        if existing
            .get(&source.id)
            .is_some_and(|m| !m.destination_id.is_empty())
        {
            outcome.reused += 1;
            continue;
        }

        let email_match = source.email.as_ref().and_then(|email| {
            destinations
                .iter()
                .find(|d| d.email.as_deref() == Some(email.as_str()))
        });

        let chosen = match (email_match, prompter.is_interactive()) {
            (Some(candidate), false) => Some(candidate),
            (Some(candidate), true) if prompter.confirm_match(source, candidate) => Some(candidate),
            (_, true) => prompter
                .choose(source, destinations)
                .and_then(|i| destinations.get(i)),
            (None, false) => None,
        };

        match chosen {
            Some(destination) => {
                debug!("Mapped {} -> {}", source.label(), destination.label());
                outcome.new_mappings.push(UserMapping::new(source, destination));
            }
            None => {
                debug!("No destination user for {}", source.label());
                outcome.skipped.push(source.clone());
            }
        }
    }

    info!(
        "User mapping: {} new, {} reused, {} skipped",
        outcome.new_mappings.len(),
        outcome.reused,
        outcome.skipped.len()
    );
    outcome
}
