//! Error types for remote calls and migration runs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single call against a remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// Server-supplied `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The response arrived but could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Token rejected and could not be refreshed.
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl ApiError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code() == Some(429)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(401)
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }

    /// 4xx other than 429 never succeed on a second try; everything else might.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || !(400..500).contains(status),
            ApiError::Network(_) => true,
            ApiError::Decode(_) | ApiError::Authentication(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The five pipeline phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    ColumnSetup,
    UserMapping,
    RecordMigration,
    Finalization,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Discovery => f.write_str("discovery"),
            Phase::ColumnSetup => f.write_str("column setup"),
            Phase::UserMapping => f.write_str("user mapping"),
            Phase::RecordMigration => f.write_str("record migration"),
            Phase::Finalization => f.write_str("finalization"),
        }
    }
}

/// Run-level failure. Item-level problems never surface here; they are
/// recorded in the run state instead.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: ApiError,
    },

    #[error("authentication failed during {phase}: {message}")]
    Authentication { phase: Phase, message: String },

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("run {0} is locked by another process")]
    Locked(String),

    #[error("run state error: {0}")]
    State(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    pub fn phase(phase: Phase, source: ApiError) -> Self {
        if let ApiError::Authentication(message) = source {
            return MigrateError::Authentication { phase, message };
        }
        MigrateError::Phase { phase, source }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!ApiError::status(400, "bad").is_retryable());
        assert!(!ApiError::status(404, "missing").is_retryable());
        assert!(!ApiError::status(422, "invalid").is_retryable());
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(ApiError::status(429, "slow down").is_retryable());
        assert!(ApiError::status(500, "boom").is_retryable());
        assert!(ApiError::status(503, "unavailable").is_retryable());
        assert!(ApiError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn auth_and_decode_errors_are_terminal() {
        assert!(!ApiError::Authentication("expired".into()).is_retryable());
        assert!(!ApiError::Decode("not json".into()).is_retryable());
    }

    #[test]
    fn phase_error_promotes_authentication() {
        let err = MigrateError::phase(Phase::Discovery, ApiError::Authentication("nope".into()));
        assert!(matches!(err, MigrateError::Authentication { phase: Phase::Discovery, .. }));

        let err = MigrateError::phase(Phase::ColumnSetup, ApiError::status(500, "boom"));
        assert!(err.to_string().starts_with("column setup failed"));
    }
}
