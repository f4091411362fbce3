//! The adapter error vocabulary. Deliberately small: abstractions decide what each one means.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("{adapter} unavailable: {message}")]
    Unavailable { adapter: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{adapter} failed: {message}")]
    Unknown { adapter: String, message: String },
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    pub fn unavailable(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn unknown(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unknown {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Map a filesystem error for `subject` onto the vocabulary.
    pub fn from_io(adapter: &str, subject: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind as K;
        match err.kind() {
            K::NotFound => Self::NotFound(subject.to_string()),
            K::AlreadyExists => Self::Conflict(format!("{} already exists", subject)),
            K::Interrupted | K::TimedOut | K::WouldBlock | K::ConnectionRefused
            | K::ConnectionReset | K::ConnectionAborted | K::BrokenPipe => {
                Self::unavailable(adapter, format!("{}: {}", subject, err))
            }
            _ => Self::unknown(adapter, format!("{}: {}", subject, err)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
