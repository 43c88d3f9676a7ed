//! Cache error types.

use std::time::Duration;

use tracing::warn;

/// Why a load did not produce a value.
///
/// Cloneable so every caller joined on the same in-flight load receives
/// its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Loader failed: {message}")]
    Failed { message: String },

    #[error("Load timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Loader panicked: {message}")]
    Panicked { message: String },
}

impl LoadError {
    pub fn failed(message: impl Into<String>) -> Self {
        LoadError::Failed {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::Timeout { .. })
    }
}

/// A background or inline refresh failed. The previous value was kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Refresh of {key} failed: {source}")]
pub struct RefreshError {
    /// Debug rendering of the key.
    pub key: String,
    #[source]
    pub source: LoadError,
}

/// Receives refresh failures.
pub trait ErrorSink: Send + Sync {
    fn refresh_failed(&self, error: RefreshError);
}

/// Default sink: logs at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn refresh_failed(&self, error: RefreshError) {
        warn!(key = %error.key, error = %error.source, "Cache refresh failed, keeping previous value");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(RefreshError) + Send + Sync,
{
    fn refresh_failed(&self, error: RefreshError) {
        self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RefreshError {
            key: "42".into(),
            source: LoadError::failed("db down"),
        };
        assert_eq!(err.to_string(), "Refresh of 42 failed: Loader failed: db down");

        let err = LoadError::Timeout {
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Load timed out after 50ms");
    }
}
