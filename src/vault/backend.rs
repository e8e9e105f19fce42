use crate::engine::error::{EngineError, EngineResult};
use keyring::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for credential storage backend
pub trait CredentialProvider: Send + Sync {
    fn set_password(&self, service: &str, key: &str, password: &str) -> EngineResult<()>;
    /// `Ok(None)` when nothing is stored under the key
    fn get_password(&self, service: &str, key: &str) -> EngineResult<Option<String>>;
    fn delete_password(&self, service: &str, key: &str) -> EngineResult<()>;
}

/// Production implementation using OS Keyring
#[derive(Default)]
pub struct KeyringProvider;

impl KeyringProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialProvider for KeyringProvider {
    fn set_password(&self, service: &str, key: &str, password: &str) -> EngineResult<()> {
        let entry = Entry::new(service, key)
            .map_err(|e| EngineError::internal(format!("Keyring error: {}", e)))?;
        entry
            .set_password(password)
            .map_err(|e| EngineError::internal(format!("Failed to set password: {}", e)))
    }

    fn get_password(&self, service: &str, key: &str) -> EngineResult<Option<String>> {
        let entry = Entry::new(service, key)
            .map_err(|e| EngineError::internal(format!("Keyring error: {}", e)))?;
        match entry.get_password() {
            Ok(pwd) => Ok(Some(pwd)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(EngineError::internal(format!("Failed to get password: {}", e))),
        }
    }

    fn delete_password(&self, service: &str, key: &str) -> EngineResult<()> {
        let entry = Entry::new(service, key)
            .map_err(|e| EngineError::internal(format!("Keyring error: {}", e)))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(EngineError::internal(format!("Failed to delete password: {}", e))),
        }
    }
}

/// In-memory implementation for tests and keychain-less environments
#[derive(Clone, Default)]
pub struct MockProvider {
    storage: Arc<Mutex<HashMap<String, String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(service: &str, key: &str) -> String {
        format!("{}::{}", service, key)
    }

    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }
}

impl CredentialProvider for MockProvider {
    fn set_password(&self, service: &str, key: &str, password: &str) -> EngineResult<()> {
        self.storage
            .lock()
            .insert(Self::key(service, key), password.to_string());
        Ok(())
    }

    fn get_password(&self, service: &str, key: &str) -> EngineResult<Option<String>> {
        Ok(self.storage.lock().get(&Self::key(service, key)).cloned())
    }

    fn delete_password(&self, service: &str, key: &str) -> EngineResult<()> {
        self.storage.lock().remove(&Self::key(service, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_roundtrip() {
        let provider = MockProvider::new();
        assert_eq!(provider.get_password("svc", "a").unwrap(), None);

        provider.set_password("svc", "a", "secret").unwrap();
        assert_eq!(provider.get_password("svc", "a").unwrap().as_deref(), Some("secret"));
        assert_eq!(provider.get_password("other", "a").unwrap(), None);

        provider.delete_password("svc", "a").unwrap();
        provider.delete_password("svc", "a").unwrap();
        assert!(provider.is_empty());
    }
}
