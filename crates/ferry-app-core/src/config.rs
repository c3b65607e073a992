// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port for Ferry tools.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Thin service that serializes config values and delegates storage to a `ConfigStore`.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load `key`, falling back to `T::default()` and persisting it when absent.
    ///
    /// Save failures are returned alongside the value so callers can log them;
    /// the loaded value is still usable.
    pub fn load_or_init<T>(&self, key: &str) -> Result<(T, Option<ConfigError>), ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.load(key)? {
            return Ok((value, None));
        }
        let value = T::default();
        let save_err = self.save(key, &value).err();
        Ok((value, save_err))
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::prefs::BrokerPrefs;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStore {
        blobs: RefCell<HashMap<String, Vec<u8>>>,
        read_only: bool,
    }

    impl ConfigStore for MemStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.blobs
                .borrow()
                .get(key)
                .cloned()
                .ok_or(ConfigError::NotFound)
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            if self.read_only {
                return Err(ConfigError::Other("read-only".into()));
            }
            self.blobs.borrow_mut().insert(key.into(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_and_empty_keys_load_as_none() {
        let svc = ConfigService::new(MemStore::default());
        assert!(svc.load::<BrokerPrefs>("broker").unwrap().is_none());
        svc.store.blobs.borrow_mut().insert("broker".into(), vec![]);
        assert!(svc.load::<BrokerPrefs>("broker").unwrap().is_none());
    }

    #[test]
    fn load_or_init_persists_defaults_once() {
        let svc = ConfigService::new(MemStore::default());
        let (prefs, err) = svc.load_or_init::<BrokerPrefs>("broker").unwrap();
        assert!(err.is_none());
        assert_eq!(prefs, BrokerPrefs::default());
        assert!(svc.store.blobs.borrow().contains_key("broker"));

        let mut tuned = prefs;
        tuned.sweep_interval_ms = 250;
        svc.save("broker", &tuned).unwrap();
        let (reloaded, _) = svc.load_or_init::<BrokerPrefs>("broker").unwrap();
        assert_eq!(reloaded.sweep_interval_ms, 250);
    }

    #[test]
    fn load_or_init_surfaces_save_failure_but_keeps_defaults() {
        let svc = ConfigService::new(MemStore {
            read_only: true,
            ..MemStore::default()
        });
        let (prefs, err) = svc.load_or_init::<BrokerPrefs>("broker").unwrap();
        assert_eq!(prefs, BrokerPrefs::default());
        assert!(matches!(err, Some(ConfigError::Other(_))));
    }

    #[test]
    fn corrupt_blob_is_a_serde_error() {
        let svc = ConfigService::new(MemStore::default());
        svc.store
            .blobs
            .borrow_mut()
            .insert("broker".into(), b"{not json".to_vec());
        assert!(matches!(
            svc.load::<BrokerPrefs>("broker"),
            Err(ConfigError::Serde(_))
        ));
    }
}
