//! Per-plugin persistent key/value data kept in plugin storage.
//!
//! Keys are laid out as `<path>/<tenant>/<plugin>/<key>`.

use crate::config::PersistenceConfig;
use crate::storage::{validate_key, SharedStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid persistence {part} '{value}'")]
    InvalidPart { part: &'static str, value: String },
    #[error("value is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

#[derive(Debug, Clone)]
pub struct Persistence {
    storage: SharedStorage,
    path: String,
    max_storage_size: usize,
}

impl Persistence {
    pub fn new(storage: SharedStorage, config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        let path = config.path.trim_matches('/').to_string();
        check_part("path", &path)?;

        tracing::info!(path = %path, backend = %storage.kind(), "Persistence initialized");
        Ok(Self {
            storage,
            path,
            max_storage_size: config.max_storage_size,
        })
    }

    pub async fn save(
        &self,
        tenant: &str,
        plugin: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), PersistenceError> {
        if data.len() > self.max_storage_size {
            return Err(PersistenceError::TooLarge {
                size: data.len(),
                limit: self.max_storage_size,
            });
        }
        let key = self.key(tenant, plugin, key)?;
        Ok(self.storage.save(&key, data).await?)
    }

    /// `None` when nothing is stored under the key.
    pub async fn load(
        &self,
        tenant: &str,
        plugin: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        let key = self.key(tenant, plugin, key)?;
        match self.storage.load(&key).await {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a value was removed.
    pub async fn delete(&self, tenant: &str, plugin: &str, key: &str) -> Result<bool, PersistenceError> {
        let key = self.key(tenant, plugin, key)?;
        match self.storage.delete(&key).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn key(&self, tenant: &str, plugin: &str, key: &str) -> Result<String, PersistenceError> {
        check_part("tenant", tenant)?;
        check_part("plugin", plugin)?;
        check_part("key", key)?;
        Ok(format!("{}/{tenant}/{plugin}/{key}", self.path))
    }
}

/// The base path may span several segments; every other part is exactly one.
fn check_part(part: &'static str, value: &str) -> Result<(), PersistenceError> {
    let single_segment = part == "path" || !value.contains('/');
    if single_segment && validate_key(value).is_ok() {
        Ok(())
    } else {
        Err(PersistenceError::InvalidPart {
            part,
            value: value.to_string(),
        })
    }
}
