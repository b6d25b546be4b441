//! The single error type threaded through every component.
//!
//! Every variant corresponds to one of the normative error kinds in the
//! tool-dispatch contract. The dispatcher (`registry::Dispatcher`) is the
//! only place an `Err(GgbError)` is ever allowed to surface as-is; everywhere
//! else it is caught and folded into an `Envelope`.

use thiserror::Error;

/// Stable error kind, serialized verbatim as the envelope's `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    ToolNotFound,
    InvalidToolArguments,
    InstanceNotReady,
    CommandFailed,
    ToolExecutionError,
    Timeout,
    DependencyMissing,
    EncodingError,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    /// Whether a client retrying the same call is likely to succeed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::InstanceNotReady | ErrorKind::Timeout | ErrorKind::DependencyMissing
        )
    }
}

#[derive(Debug, Error)]
pub enum GgbError {
    #[error("{0}")]
    Validation(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid arguments: {0:?}")]
    InvalidToolArguments(Vec<String>),

    #[error("instance not ready (state: {0})")]
    InstanceNotReady(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("tool execution failed: {0}")]
    ToolExecutionError(#[source] anyhow::Error),

    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    #[error("encoding failed: {0}")]
    EncodingError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GgbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GgbError::Validation(_) => ErrorKind::ValidationError,
            GgbError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            GgbError::InvalidToolArguments(_) => ErrorKind::InvalidToolArguments,
            GgbError::InstanceNotReady(_) => ErrorKind::InstanceNotReady,
            GgbError::CommandFailed(_) => ErrorKind::CommandFailed,
            GgbError::ToolExecutionError(_) => ErrorKind::ToolExecutionError,
            GgbError::DependencyMissing(_) => ErrorKind::DependencyMissing,
            GgbError::EncodingError(_) => ErrorKind::EncodingError,
            GgbError::Cancelled => ErrorKind::Cancelled,
            GgbError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// A short, user-facing recovery hint, per spec.md §7.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            GgbError::InstanceNotReady(_) => Some("retry after the instance finishes initializing"),
            GgbError::DependencyMissing(_) => Some("install the required external binary and retry"),
            GgbError::Cancelled => Some("the operation was cancelled before completion"),
            _ => None,
        }
    }
}

pub type GgbResult<T> = Result<T, GgbError>;
