//! Error taxonomy for release lifecycle operations.
//!
//! Every variant carries the host it happened on so fleet reports can say
//! which machine failed. Retention aborts are not errors; see
//! [`crate::core::retention::RetentionDecision`].

use thiserror::Error;

/// Result alias for per-host lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Remote command failed, timed out, or the host was unreachable.
    ///
    /// Callers may retry; the lifecycle core never does.
    #[error("{host}: execution failed: {reason}")]
    Execution { host: String, reason: String },

    /// Cutover or an explicit release reference named a path that does not exist.
    #[error("{host}: release not found: {path}")]
    ReleaseNotFound { host: String, path: String },

    /// `remove last` on a record with no entries.
    #[error("{host}: release record is empty")]
    EmptyRecord { host: String },

    /// "previous release" needs at least two record entries.
    #[error("{host}: release record has {entries} entries, need at least 2")]
    InsufficientHistory { host: String, entries: usize },
}

impl LifecycleError {
    pub fn execution(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Host the error was raised for.
    pub fn host(&self) -> &str {
        match self {
            Self::Execution { host, .. }
            | Self::ReleaseNotFound { host, .. }
            | Self::EmptyRecord { host }
            | Self::InsufficientHistory { host, .. } => host,
        }
    }

    /// Stable short code used in JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execution { .. } => "execution",
            Self::ReleaseNotFound { .. } => "release_not_found",
            Self::EmptyRecord { .. } => "empty_record",
            Self::InsufficientHistory { .. } => "insufficient_history",
        }
    }
}
