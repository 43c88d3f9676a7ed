use std::time::Duration;

use cachesync_cache::{CacheOptions, RefreshMode};
use cachesync_core::events::DispatchMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Cache validations
        if self.cache.max_capacity == Some(0) {
            return Err("cache.max_capacity must be > 0".into());
        }
        let durations = [
            ("cache.expire_after_write_ms", self.cache.expire_after_write_ms),
            ("cache.expire_after_access_ms", self.cache.expire_after_access_ms),
            ("cache.refresh_after_write_ms", self.cache.refresh_after_write_ms),
            ("cache.negative_ttl_ms", self.cache.negative_ttl_ms),
            ("cache.load_timeout_ms", self.cache.load_timeout_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == Some(0)) {
            return Err(format!("{name} must be > 0 when set"));
        }
        // Bus validations
        if self.bus.name.trim().is_empty() {
            return Err("bus.name must not be empty".into());
        }
        if self.bus.handler_timeout_ms == 0 {
            return Err("bus.handler_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: Option<usize>,
    #[serde(default)]
    pub expire_after_write_ms: Option<u64>,
    #[serde(default)]
    pub expire_after_access_ms: Option<u64>,
    #[serde(default)]
    pub refresh_after_write_ms: Option<u64>,
    #[serde(default = "default_negative_ttl_ms")]
    pub negative_ttl_ms: Option<u64>,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: Option<u64>,
    /// Inline by default so an `Updated` event is fully applied once the
    /// publishing store call returns.
    #[serde(default = "default_refresh_mode")]
    pub refresh_mode: RefreshMode,
}

fn default_max_capacity() -> Option<usize> {
    Some(10_000)
}
fn default_negative_ttl_ms() -> Option<u64> {
    Some(5_000)
}
fn default_load_timeout_ms() -> Option<u64> {
    Some(5_000)
}
fn default_refresh_mode() -> RefreshMode {
    RefreshMode::Inline
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            expire_after_write_ms: None,
            expire_after_access_ms: None,
            refresh_after_write_ms: None,
            negative_ttl_ms: default_negative_ttl_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            refresh_mode: default_refresh_mode(),
        }
    }
}

impl CacheSettings {
    pub fn to_options(&self) -> CacheOptions {
        CacheOptions {
            max_capacity: self.max_capacity,
            expire_after_write: self.expire_after_write_ms.map(Duration::from_millis),
            expire_after_access: self.expire_after_access_ms.map(Duration::from_millis),
            refresh_after_write: self.refresh_after_write_ms.map(Duration::from_millis),
            negative_ttl: self.negative_ttl_ms.map(Duration::from_millis),
            load_timeout: self.load_timeout_ms.map(Duration::from_millis),
            refresh_mode: self.refresh_mode,
            ..CacheOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_bus_name")]
    pub name: String,
    #[serde(default)]
    pub mode: DispatchMode,
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

fn default_bus_name() -> String {
    "entities".into()
}
fn default_handler_timeout_ms() -> u64 {
    30_000
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            name: default_bus_name(),
            mode: DispatchMode::default(),
            handler_timeout_ms: default_handler_timeout_ms(),
        }
    }
}

impl BusSettings {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordinatorSettings {
    /// Put the payload of `Created` events straight into the cache.
    #[serde(default)]
    pub prepopulate_on_create: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default config file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "cachesync.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., CACHESYNC__CACHE__MAX_CAPACITY=500
        builder = builder.add_source(
            Environment::with_prefix("CACHESYNC")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());

        let options = cfg.cache.to_options();
        assert_eq!(options.max_capacity, Some(10_000));
        assert_eq!(options.negative_ttl, Some(Duration::from_secs(5)));
        assert_eq!(options.refresh_mode, RefreshMode::Inline);
        assert_eq!(cfg.bus.mode, DispatchMode::Inline);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[cache]
max_capacity = 3
expire_after_write_ms = 60000
refresh_mode = "background"

[bus]
name = "users"
mode = "async"
handler_timeout_ms = 250

[coordinator]
prepopulate_on_create = true

[logging]
level = "debug"
"#,
        );

        let cfg = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.cache.max_capacity, Some(3));
        assert_eq!(cfg.cache.expire_after_write_ms, Some(60_000));
        assert_eq!(cfg.cache.refresh_mode, RefreshMode::Background);
        assert_eq!(cfg.cache.load_timeout_ms, Some(5_000));
        assert_eq!(cfg.bus.name, "users");
        assert_eq!(cfg.bus.mode, DispatchMode::Async);
        assert_eq!(cfg.bus.handler_timeout(), Duration::from_millis(250));
        assert!(cfg.coordinator.prepopulate_on_create);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("[cache]\nmax_capacity = 0\n");
        let err = loader::load_config(file.path().to_str()).unwrap_err();
        assert_eq!(err, "cache.max_capacity must be > 0");

        let mut cfg = AppConfig::default();
        cfg.cache.negative_ttl_ms = Some(0);
        assert_eq!(
            cfg.validate().unwrap_err(),
            "cache.negative_ttl_ms must be > 0 when set"
        );

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = loader::load_config(Some("/nonexistent/cachesync.toml")).unwrap_err();
        assert!(err.contains("config file not found"));
    }
}
