//! Error types for plan execution.
//!
//! [`ActionError`] is what a platform client reports for a single call; its
//! category decides whether the scheduler retries. [`Error`] covers failures
//! of the engine itself (journal I/O, thread pool setup), which abort a run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Categories of client errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection drop, timeout, 5xx (retryable)
    Transient,
    /// Rate budget exhausted; wait for the cooldown, then retry
    RateLimited,
    /// Target resource does not exist
    NotFound,
    /// Platform refused the request (validation, permissions, conflict)
    Rejected,
    /// No handler for this action type
    Unsupported,
}

impl ErrorCategory {
    /// Whether errors of this category are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Rejected => "rejected",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Failure of one call into the platform client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rejected: {message}")]
    Rejected { message: String },

    #[error("no handler for action type {action_type}")]
    Unsupported { action_type: String },
}

impl ActionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Failures that abort an apply or rollback run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid plan: {0}")]
    Plan(#[from] actionplan::CompilationError),

    #[error("corrupt journal {}: line {line}: {message}", path.display())]
    CorruptJournal {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(ActionError::transient("timeout").is_retryable());
        assert!(
            ActionError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(!ActionError::not_found("gone").is_retryable());
        assert!(!ActionError::rejected("422").is_retryable());
        assert!(
            !ActionError::Unsupported {
                action_type: "push_wiki".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display() {
        let err = ActionError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 1.5s");
        assert_eq!(err.category().as_str(), "rate_limited");
    }
}
