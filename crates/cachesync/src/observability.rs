// Tracing initialization with a configurable and reloadable log level.
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Changes the active log filter after startup.
///
/// Returned by [`init_tracing`] and owned by the caller.
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Apply a new logging level (any `EnvFilter` directive).
    pub fn apply(&self, level: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(level).map_err(|e| format!("invalid log level: {e}"))?;
        self.handle
            .modify(|f| *f = filter)
            .map_err(|e| format!("log level reload failed: {e}"))
    }

    /// Apply the level from configuration unless `RUST_LOG` already chose
    /// the filter. Returns whether the filter changed.
    pub fn apply_configured(&self, level: &str) -> Result<bool, String> {
        if env_filter(std::env::var("RUST_LOG").ok()).is_some() {
            return Ok(false);
        }
        self.apply(level).map(|()| true)
    }
}

/// A usable filter from a `RUST_LOG` value, if one was given.
fn env_filter(value: Option<String>) -> Option<EnvFilter> {
    value
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. Returns `None` if a subscriber
/// was already installed, in which case the level cannot be changed here.
pub fn init_tracing(level: &str) -> Option<LogLevelHandle> {
    let base_filter = env_filter(std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);

    tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init()
        .ok()
        .map(|()| LogLevelHandle { handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_level() {
        // Only the first installer in a test binary gets a handle.
        if let Some(handle) = init_tracing("info") {
            assert!(handle.apply("debug").is_ok());
            assert!(handle.apply("cachesync=trace,warn").is_ok());
        }
        assert!(init_tracing("info").is_none());
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        assert!(env_filter(None).is_none());
        assert!(env_filter(Some("  ".into())).is_none());
        assert!(env_filter(Some("cachesync=debug".into())).is_some());
    }
}
