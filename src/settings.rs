//! UI preferences persisted as `settings.json` in the data directory.
//!
//! Keys the backend does not know about are kept verbatim so the UI can
//! store its own state without a backend change.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult};
use crate::vault::storage::write_atomic;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentQuery {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connection_id: String,
    pub sql: String,
    /// Unix epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default)]
    pub recent_queries: Vec<RecentQuery>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct SettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SETTINGS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings, or defaults when nothing was saved yet
    pub fn load(&self) -> EngineResult<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| EngineError::internal(format!("Failed to read settings: {}", e)))?;
        if content.trim().is_empty() {
            return Ok(AppSettings::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| EngineError::internal(format!("Failed to parse settings: {}", e)))
    }

    pub fn save(&self, settings: &AppSettings) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| EngineError::internal(format!("Failed to serialize settings: {}", e)))?;
        let _guard = self.write_lock.lock();
        write_atomic(&self.path, &content)
            .map_err(|e| EngineError::internal(format!("Failed to write settings: {}", e)))
    }
}
