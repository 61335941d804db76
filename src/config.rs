use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::RetryPolicy;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub basecamp: Option<BasecampConfig>,
    pub fizzy: Option<FizzyConfig>,
    #[serde(default)]
    pub migration: MigrationConfig,
}

#[derive(Debug, Deserialize)]
pub struct BasecampConfig {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_basecamp_rate")]
    pub requests_per_second: f64,
}

#[derive(Debug, Deserialize)]
pub struct FizzyConfig {
    #[serde(default = "default_fizzy_url")]
    pub base_url: String,
    pub account: String,
    pub token: String,
    #[serde(default = "default_fizzy_rate")]
    pub requests_per_second: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct MigrationConfig {
    pub state_dir: Option<String>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

fn default_basecamp_rate() -> f64 {
    5.0
}

fn default_fizzy_rate() -> f64 {
    10.0
}

fn default_fizzy_url() -> String {
    "https://app.fizzy.do".into()
}

impl MigrationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let base = self
            .base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        let max = self
            .max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);
        RetryPolicy::default()
            .with_max_retries(self.max_retries.unwrap_or(defaults.max_retries))
            .with_delays(base, max)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("runs"))
    }
}

/// Where the migrated cards should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationTarget {
    Existing(String),
    CreateNew(String),
}

/// Flags that shape one run. Stored verbatim in the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    pub migrate_comments: bool,
    pub update_existing: bool,
    pub dry_run: bool,
    pub skip_user_mapping: bool,
    pub batch_size: usize,
    #[serde(default)]
    pub interactive: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            migrate_comments: false,
            update_existing: false,
            dry_run: false,
            skip_user_mapping: false,
            batch_size: 10,
            interactive: false,
        }
    }
}

/// Everything the orchestrator needs to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub project_id: String,
    pub card_table_id: String,
    pub destination: DestinationTarget,
    pub options: MigrationOptions,
}

fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".board-migrate")
}

pub fn load_config() -> Result<AppConfig> {
    let path = config_path();
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).with_context(|| "Failed to parse config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = parse_config(
            r#"
            [basecamp]
            account_id = "999"
            access_token = "bc-token"
            refresh_token = "bc-refresh"
            client_id = "id"
            client_secret = "secret"

            [fizzy]
            account = "897362094"
            token = "fz-token"
            requests_per_second = 2.5

            [migration]
            state_dir = "/tmp/runs"
            max_retries = 5
            base_delay_ms = 200
            "#,
        )
        .unwrap();

        let basecamp = config.basecamp.unwrap();
        assert_eq!(basecamp.account_id, "999");
        assert_eq!(basecamp.requests_per_second, 5.0);

        let fizzy = config.fizzy.unwrap();
        assert_eq!(fizzy.base_url, "https://app.fizzy.do");
        assert_eq!(fizzy.requests_per_second, 2.5);

        let policy = config.migration.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(config.migration.state_dir(), PathBuf::from("/tmp/runs"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.basecamp.is_none());
        assert!(config.fizzy.is_none());
        assert_eq!(config.migration.retry_policy().max_retries, 3);
        assert!(config.migration.state_dir().ends_with("runs"));
    }

    #[test]
    fn missing_required_field_fails() {
        let result = parse_config("[fizzy]\naccount = \"1\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn default_batch_size_is_ten() {
        assert_eq!(MigrationOptions::default().batch_size, 10);
    }
}
