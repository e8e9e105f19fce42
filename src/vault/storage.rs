//! Profile Storage
//!
//! Connection profiles are stored in a local JSON document keyed by profile
//! id. Passwords never touch that file: they live in the credential
//! provider (the OS keychain in production).

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{CloudSqlOptions, ConnectionProfile};
use crate::vault::backend::CredentialProvider;
use pgdesk_core::Sensitive;

pub const SERVICE_NAME: &str = "pgdesk";
const CONNECTIONS_FILE: &str = "connections.json";

/// Partial profile update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub engine: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<Sensitive<String>>,
    pub ssl: Option<bool>,
    pub ssl_accept_invalid_certs: Option<bool>,
    pub cloud: Option<CloudSqlOptions>,
    pub pool_max_connections: Option<u32>,
    pub pool_connect_timeout_secs: Option<u32>,
    pub pool_idle_timeout_secs: Option<u32>,
}

impl ProfileUpdate {
    fn apply(self, profile: &mut ConnectionProfile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(engine) = self.engine {
            profile.engine = engine;
        }
        if let Some(host) = self.host {
            profile.host = host;
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        if let Some(database) = self.database {
            profile.database = database;
        }
        if let Some(username) = self.username {
            profile.username = username;
        }
        if let Some(ssl) = self.ssl {
            profile.ssl = ssl;
        }
        if let Some(relaxed) = self.ssl_accept_invalid_certs {
            profile.ssl_accept_invalid_certs = relaxed;
        }
        if let Some(cloud) = self.cloud {
            profile.cloud = Some(cloud);
        }
        if let Some(max) = self.pool_max_connections {
            profile.pool_max_connections = Some(max);
        }
        if let Some(secs) = self.pool_connect_timeout_secs {
            profile.pool_connect_timeout_secs = Some(secs);
        }
        if let Some(secs) = self.pool_idle_timeout_secs {
            profile.pool_idle_timeout_secs = Some(secs);
        }
    }
}

/// Replaces `path` with `content` through a uniquely named sibling file,
/// so readers see either the old or the new document.
pub(crate) fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

/// Storage for saved connection profiles and their passwords
pub struct ProfileStore {
    storage_dir: PathBuf,
    credentials: Arc<dyn CredentialProvider>,
    /// Held across every load-modify-write of the document
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(storage_dir: impl Into<PathBuf>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            credentials,
            write_lock: Mutex::new(()),
        }
    }

    /// Gets the keyring key for a profile's password
    fn credentials_key(profile_id: &str) -> String {
        format!("creds_{}", profile_id)
    }

    fn connections_file_path(&self) -> PathBuf {
        self.storage_dir.join(CONNECTIONS_FILE)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn load_connections_file(&self) -> EngineResult<BTreeMap<String, ConnectionProfile>> {
        let path = self.connections_file_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| EngineError::internal(format!("Failed to read connections file: {}", e)))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content)
            .map_err(|e| EngineError::internal(format!("Failed to parse connections file: {}", e)))
    }

    fn save_connections_file(&self, profiles: &BTreeMap<String, ConnectionProfile>) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(profiles)
            .map_err(|e| EngineError::internal(format!("Failed to serialize connections: {}", e)))?;

        write_atomic(&self.connections_file_path(), &content)
            .map_err(|e| EngineError::internal(format!("Failed to write connections file: {}", e)))
    }

    /// All profiles, without passwords, ordered by id
    pub fn list(&self) -> EngineResult<Vec<ConnectionProfile>> {
        Ok(self.load_connections_file()?.into_values().collect())
    }

    /// A profile with its password filled in from the credential store
    pub fn get(&self, profile_id: &str) -> EngineResult<Option<ConnectionProfile>> {
        let Some(mut profile) = self.load_connections_file()?.remove(profile_id) else {
            return Ok(None);
        };

        match self
            .credentials
            .get_password(SERVICE_NAME, &Self::credentials_key(profile_id))?
        {
            Some(password) => profile.password = Sensitive::new(password),
            None => debug!(profile_id, "No stored password for profile"),
        }
        Ok(Some(profile))
    }

    /// Saves a profile, assigning an id when it has none. Returns the id.
    pub fn save(&self, mut profile: ConnectionProfile) -> EngineResult<String> {
        let id = match profile.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("conn_{}", Uuid::now_v7().simple()),
        };
        profile.id = Some(id.clone());

        if !profile.password.is_empty() {
            self.credentials.set_password(
                SERVICE_NAME,
                &Self::credentials_key(&id),
                profile.password.expose(),
            )?;
        }
        profile.password = Sensitive::default();

        let _guard = self.write_lock.lock();
        let mut profiles = self.load_connections_file()?;
        profiles.insert(id.clone(), profile);
        self.save_connections_file(&profiles)?;
        Ok(id)
    }

    /// Merges the supplied fields into a stored profile.
    /// Returns `false` when no profile has that id.
    pub fn update(&self, profile_id: &str, changes: ProfileUpdate) -> EngineResult<bool> {
        let _guard = self.write_lock.lock();
        let mut profiles = self.load_connections_file()?;
        let Some(profile) = profiles.get_mut(profile_id) else {
            return Ok(false);
        };

        if let Some(password) = changes.password.as_ref() {
            let key = Self::credentials_key(profile_id);
            if password.is_empty() {
                self.credentials.delete_password(SERVICE_NAME, &key)?;
            } else {
                self.credentials
                    .set_password(SERVICE_NAME, &key, password.expose())?;
            }
        }
        changes.apply(profile);

        self.save_connections_file(&profiles)?;
        Ok(true)
    }

    /// Deletes a profile and its stored password.
    /// Returns `false` when no profile has that id.
    pub fn delete(&self, profile_id: &str) -> EngineResult<bool> {
        {
            let _guard = self.write_lock.lock();
            let mut profiles = self.load_connections_file()?;
            if profiles.remove(profile_id).is_none() {
                return Ok(false);
            }
            self.save_connections_file(&profiles)?;
        }

        if let Err(e) = self
            .credentials
            .delete_password(SERVICE_NAME, &Self::credentials_key(profile_id))
        {
            warn!(profile_id, error = %e, "Failed to remove stored password");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::backend::MockProvider;
    use tempfile::TempDir;

    fn store() -> (ProfileStore, MockProvider, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let provider = MockProvider::new();
        let store = ProfileStore::new(temp_dir.path(), Arc::new(provider.clone()));
        (store, provider, temp_dir)
    }

    fn profile() -> ConnectionProfile {
        let mut profile = ConnectionProfile::postgres("db.local", 5432, "app", "alice", "s3cret");
        profile.name = "Local".into();
        profile
    }

    #[test]
    fn save_list_get_delete_roundtrip() -> EngineResult<()> {
        let (store, provider, temp_dir) = store();

        let id = store.save(profile())?;
        assert!(id.starts_with("conn_"));

        let listed = store.list()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_deref(), Some(id.as_str()));
        assert!(listed[0].password.is_empty());

        let loaded = store.get(&id)?.unwrap();
        assert_eq!(loaded.name, "Local");
        assert_eq!(loaded.password.expose(), "s3cret");

        // The document on disk holds no secret
        let raw = fs::read_to_string(temp_dir.path().join(CONNECTIONS_FILE)).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(raw.contains(&id));

        assert!(store.delete(&id)?);
        assert!(store.list()?.is_empty());
        assert!(store.get(&id)?.is_none());
        assert!(provider.is_empty());
        assert!(!store.delete(&id)?);
        Ok(())
    }

    #[test]
    fn save_keeps_existing_id() -> EngineResult<()> {
        let (store, _provider, _dir) = store();
        let mut p = profile();
        p.id = Some("conn_fixed".into());

        assert_eq!(store.save(p.clone())?, "conn_fixed");
        p.name = "Renamed".into();
        assert_eq!(store.save(p)?, "conn_fixed");

        let listed = store.list()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Renamed");
        Ok(())
    }

    #[test]
    fn update_merges_fields() -> EngineResult<()> {
        let (store, _provider, _dir) = store();
        let id = store.save(profile())?;

        let changes: ProfileUpdate =
            serde_json::from_str(r#"{"port": 6543, "ssl": true, "password": "n3w"}"#).unwrap();
        assert!(store.update(&id, changes)?);

        let loaded = store.get(&id)?.unwrap();
        assert_eq!(loaded.port, 6543);
        assert!(loaded.ssl);
        assert_eq!(loaded.host, "db.local");
        assert_eq!(loaded.name, "Local");
        assert_eq!(loaded.password.expose(), "n3w");

        assert!(!store.update("conn_missing", ProfileUpdate::default())?);
        Ok(())
    }

    #[test]
    fn concurrent_saves_keep_every_profile() -> EngineResult<()> {
        let (store, provider, temp_dir) = store();

        for round in 0..20 {
            let results: Vec<EngineResult<String>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..16)
                    .map(|i| {
                        let store = &store;
                        scope.spawn(move || {
                            let mut p = profile();
                            p.id = Some(format!("conn_{}_{}", round, i));
                            p.name = format!("Profile {}", i);
                            store.save(p)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            for result in results {
                result?;
            }
            assert_eq!(store.list()?.len(), 16 * (round + 1));
        }

        assert_eq!(provider.len(), 16 * 20);
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name())
            .filter(|name| name != CONNECTIONS_FILE)
            .collect();
        assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
        Ok(())
    }

    #[test]
    fn missing_or_empty_file_is_empty_store() -> EngineResult<()> {
        let (store, _provider, temp_dir) = store();
        assert!(store.list()?.is_empty());

        fs::write(temp_dir.path().join(CONNECTIONS_FILE), "").unwrap();
        assert!(store.list()?.is_empty());

        fs::write(temp_dir.path().join(CONNECTIONS_FILE), "{not json").unwrap();
        assert!(store.list().is_err());
        Ok(())
    }
}
