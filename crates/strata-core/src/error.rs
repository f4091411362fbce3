//! Error types for Strata

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ProtocolKind;

/// The fixed error vocabulary every layer above the adapters speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    NotFound,
    Conflict,
    ContextRequired,
    PartialCommit,
    Timeout,
    InvalidInput,
    InvalidTransition,
    Cancelled,
    NotInitialized,
    Corrupt,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ContextRequired => "context_required",
            Self::PartialCommit => "partial_commit",
            Self::Timeout => "timeout",
            Self::InvalidInput => "invalid_input",
            Self::InvalidTransition => "invalid_transition",
            Self::Cancelled => "cancelled",
            Self::NotInitialized => "not_initialized",
            Self::Corrupt => "corrupt",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the blob after a failed metadata write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compensation {
    /// The blob was deleted again.
    RolledBack,
    /// The blob could not be deleted and carries an orphan marker.
    Orphaned,
    /// Found on read: a blob exists with no metadata record.
    Detected,
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RolledBack => write!(f, "rolled back"),
            Self::Orphaned => write!(f, "orphaned"),
            Self::Detected => write!(f, "detected"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unavailable: {component} - {message}")]
    Unavailable { component: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("context required to resolve {subject}")]
    ContextRequired {
        subject: String,
        /// Execution that owns the subject, when known. Callers can fall back to it.
        execution_id: Option<String>,
    },

    #[error("partial commit for {file_id}: {reason} (blob {compensation})")]
    PartialCommit {
        file_id: String,
        reason: String,
        compensation: Compensation,
    },

    #[error("timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("protocol not resolvable: {0}")]
    ProtocolUnresolved(ProtocolKind),

    #[error("foundation not initialized")]
    NotInitialized,

    #[error("corrupt content: {0}")]
    Corrupt(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unavailable(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn context_required(subject: impl Into<String>, execution_id: Option<String>) -> Self {
        Self::ContextRequired {
            subject: subject.into(),
            execution_id,
        }
    }

    pub fn partial_commit(
        file_id: impl Into<String>,
        reason: impl Into<String>,
        compensation: Compensation,
    ) -> Self {
        Self::PartialCommit {
            file_id: file_id.into(),
            reason: reason.into(),
            compensation,
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::ContextRequired { .. } => ErrorKind::ContextRequired,
            Self::PartialCommit { .. } => ErrorKind::PartialCommit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidInput(_) | Self::ConfigError(_) => ErrorKind::InvalidInput,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ProtocolUnresolved(_) | Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::JsonError(_) | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Only transient unavailability and write collisions are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Conflict)
    }
}
