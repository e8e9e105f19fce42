//! Runtime configuration.
//!
//! Everything is read from `PGDESK_*` environment variables once at start-up;
//! unset variables fall back to platform directories and built-in defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::error::{EngineError, EngineResult};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STREAM_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_LOG_FILTER: &str = "pgdesk=info,pgdesk_lib=info";

const APP_DIR: &str = "pgdesk";

/// Pool sizing shared by every session unless a profile overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Holds `connections.json` and `settings.json`
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_filter: String,
    pub pool: PoolSettings,
    pub stream_batch_size: u32,
}

impl AppConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> EngineResult<Self> {
        let defaults = Self::with_data_dir(default_data_dir());

        let data_dir = vars
            .get("PGDESK_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let log_dir = vars
            .get("PGDESK_LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));
        let log_filter = vars
            .get("PGDESK_LOG")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or(defaults.log_filter);

        let pool = PoolSettings {
            max_connections: parse_var(&vars, "PGDESK_POOL_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            connect_timeout_secs: parse_var(&vars, "PGDESK_CONNECT_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout_secs: parse_var(&vars, "PGDESK_IDLE_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        };
        if pool.max_connections == 0 {
            return Err(EngineError::validation(
                "PGDESK_POOL_MAX_CONNECTIONS must be at least 1",
            ));
        }
        if pool.connect_timeout_secs == 0 {
            return Err(EngineError::validation(
                "PGDESK_CONNECT_TIMEOUT_SECS must be at least 1",
            ));
        }

        let stream_batch_size = parse_var(&vars, "PGDESK_STREAM_BATCH_SIZE")?
            .unwrap_or(DEFAULT_STREAM_BATCH_SIZE);
        if stream_batch_size == 0 {
            return Err(EngineError::validation(
                "PGDESK_STREAM_BATCH_SIZE must be at least 1",
            ));
        }

        Ok(Self {
            data_dir,
            log_dir,
            log_filter,
            pool,
            stream_batch_size,
        })
    }

    /// Defaults rooted at `data_dir`. Used by tests with a temporary directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            log_dir: data_dir.join("logs"),
            data_dir,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            pool: PoolSettings::default(),
            stream_batch_size: DEFAULT_STREAM_BATCH_SIZE,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, key: &str) -> EngineResult<Option<T>> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::validation(format!("{key} has an invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_vars(vars(&[("PGDESK_DATA_DIR", "/tmp/pgdesk-test")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pgdesk-test"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/pgdesk-test/logs"));
        assert_eq!(config.pool, PoolSettings::default());
        assert_eq!(config.stream_batch_size, 1000);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_vars(vars(&[
            ("PGDESK_DATA_DIR", "/data"),
            ("PGDESK_LOG_DIR", "/logs"),
            ("PGDESK_POOL_MAX_CONNECTIONS", "4"),
            ("PGDESK_CONNECT_TIMEOUT_SECS", " 5 "),
            ("PGDESK_STREAM_BATCH_SIZE", "250"),
        ]))
        .unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/logs"));
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.connect_timeout_secs, 5);
        assert_eq!(config.pool.idle_timeout_secs, DEFAULT_IDLE_TIMEOUT_SECS);
        assert_eq!(config.stream_batch_size, 250);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_vars(vars(&[("PGDESK_POOL_MAX_CONNECTIONS", "ten")])).unwrap_err();
        assert!(matches!(err, EngineError::ValidationError { .. }));

        let err = AppConfig::from_vars(vars(&[("PGDESK_STREAM_BATCH_SIZE", "0")])).unwrap_err();
        assert!(err.to_string().contains("PGDESK_STREAM_BATCH_SIZE"));
    }
}
