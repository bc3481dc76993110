use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// Errors surfaced at the queue, dispatcher and event bus boundary.
///
/// These are the only error kinds that cross the boundary. Handler,
/// listener and capability failures are carried inside [`QueueError::Handler`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The caller's scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's scope deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// No resident job carries this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Retry was requested for a job already at its ceiling.
    #[error("job {job_id} exceeded max retries ({max_retries})")]
    ExceededMaxRetries { job_id: JobId, max_retries: u32 },

    /// A job handler or event listener returned an error.
    #[error("handler error: {0:#}")]
    Handler(#[source] anyhow::Error),
}

impl QueueError {
    /// Wrap a handler failure.
    pub fn handler(err: impl Into<anyhow::Error>) -> Self {
        Self::Handler(err.into())
    }

    /// The copyable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::Deadline,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ExceededMaxRetries { .. } => ErrorKind::ExceededMaxRetries,
            Self::Handler(_) => ErrorKind::Handler,
        }
    }

    /// True for `cancelled` and `deadline`.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Whether a worker may put the job back on the queue after this error.
    ///
    /// Handler failures and scope interruptions are retryable; bookkeeping
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Handler(_) | Self::Cancelled | Self::DeadlineExceeded
        )
    }
}

/// Discriminant of [`QueueError`], used in failure records and lifecycle events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Deadline,
    NotFound,
    ExceededMaxRetries,
    Handler,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Deadline => "deadline",
            Self::NotFound => "not_found",
            Self::ExceededMaxRetries => "exceeded_max_retries",
            Self::Handler => "handler_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result alias for boundary operations.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        assert_eq!(QueueError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(QueueError::DeadlineExceeded.kind(), ErrorKind::Deadline);
        assert_ne!(
            QueueError::Cancelled.kind(),
            QueueError::DeadlineExceeded.kind()
        );
        assert_eq!(
            QueueError::NotFound(JobId::from("a")).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_handler_error_keeps_inner() {
        let err = QueueError::handler(anyhow::anyhow!("smtp refused"));
        assert_eq!(err.kind(), ErrorKind::Handler);
        assert!(err.to_string().contains("smtp refused"));
        match err {
            QueueError::Handler(inner) => {
                assert_eq!(inner.to_string(), "smtp refused")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(QueueError::handler(anyhow::anyhow!("x")).is_retryable());
        assert!(QueueError::DeadlineExceeded.is_retryable());
        assert!(!QueueError::NotFound(JobId::from("a")).is_retryable());
        assert!(!QueueError::ExceededMaxRetries {
            job_id: JobId::from("a"),
            max_retries: 3
        }
        .is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ExceededMaxRetries).unwrap();
        assert_eq!(json, "\"exceeded_max_retries\"");
    }
}
