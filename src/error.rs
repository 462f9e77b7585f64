//! Error taxonomy for pool operations.

use std::fmt;
use std::time::Duration;

/// Boxed source error from a user-supplied collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`crate::Pool`] and [`crate::PoolableRef`] operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pool has been disposed; no further acquisitions are possible.
    #[error("pool has been shut down")]
    PoolShutDown,

    /// The pending-acquire queue was already at its configured capacity.
    #[error("pending acquire queue is full (max {max})")]
    PendingQueueFull {
        /// The configured `max_pending_acquire` that was hit.
        max: usize,
    },

    /// A pending acquire exceeded its configured timeout before a resource
    /// became available.
    #[error("acquire timed out after {0:?}")]
    AcquireTimeout(Duration),

    /// The user-supplied allocator failed to produce a new resource.
    #[error("allocator failed: {source}")]
    AllocatorFailure {
        /// The underlying error returned by the allocator.
        #[source]
        source: BoxError,
    },

    /// The user-supplied release handler failed while resetting a resource.
    ///
    /// The resource is destroyed regardless of this failure.
    #[error("release handler failed: {source}")]
    ReleaseHandlerFailure {
        /// The underlying error returned by the release handler.
        #[source]
        source: BoxError,
    },

    /// The user-supplied destroy handler failed while tearing down a
    /// resource. Only surfaced from [`crate::PoolableRef::invalidate`];
    /// internally-triggered destruction logs and records this instead.
    #[error("destroy handler failed: {source}")]
    DestroyHandlerFailure {
        /// The underlying error returned by the destroy handler.
        #[source]
        source: BoxError,
    },

    /// The pool configuration failed validation at build time.
    #[error("invalid pool configuration: {0}")]
    IllegalConfig(String),
}

impl Error {
    pub(crate) fn allocator(source: impl Into<BoxError>) -> Self {
        Error::AllocatorFailure {
            source: source.into(),
        }
    }

    pub(crate) fn release_handler(source: impl Into<BoxError>) -> Self {
        Error::ReleaseHandlerFailure {
            source: source.into(),
        }
    }

    pub(crate) fn destroy_handler(source: impl Into<BoxError>) -> Self {
        Error::DestroyHandlerFailure {
            source: source.into(),
        }
    }

    /// Whether retrying the same operation might succeed without
    /// configuration changes. Timeouts and transient allocator failures are
    /// retryable; shutdown and configuration errors are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AcquireTimeout(_) | Error::PendingQueueFull { .. } | Error::AllocatorFailure { .. }
        )
    }
}

/// Convenience alias for results returned by pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single structured field-validation failure, used when a configuration
/// has more than one problem worth reporting together.
#[derive(Debug, Clone)]
pub struct FieldViolation {
    /// Name of the offending field.
    pub field: &'static str,
    /// Human-readable description of the violation.
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl FieldViolation {
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub(crate) fn illegal_config(violations: Vec<FieldViolation>) -> Error {
    let joined = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Error::IllegalConfig(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_failure_preserves_source() {
        let inner = std::io::Error::other("boom");
        let err = Error::allocator(inner);
        assert!(err.source().is_some());
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::AcquireTimeout(Duration::from_millis(1)).is_retryable());
        assert!(Error::PendingQueueFull { max: 1 }.is_retryable());
        assert!(!Error::PoolShutDown.is_retryable());
        assert!(!Error::IllegalConfig("bad".into()).is_retryable());
    }

    #[test]
    fn illegal_config_joins_violations() {
        let err = illegal_config(vec![
            FieldViolation::new("size_max", "must be >= 1"),
            FieldViolation::new("initial_size", "must be <= size_max"),
        ]);
        match err {
            Error::IllegalConfig(msg) => {
                assert!(msg.contains("size_max"));
                assert!(msg.contains("initial_size"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
