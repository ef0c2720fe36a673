//! Plugin blob storage.
//!
//! # Data Flow
//! ```text
//! StorageConfig.kind (string)
//!     → StorageKind (closed set, unknown kind is its own error)
//!     → per-kind constructor, validated independently
//!     → Arc<dyn Storage> shared by plugin manager and persistence
//! ```
//!
//! # Design Decisions
//! - Selection happens once at startup; any error is fatal
//! - No retry here; transient failures belong to the backend

pub mod local;
pub mod object;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::observability::metrics;

pub use local::LocalStorage;
pub use object::ObjectStore;

/// Durable blob storage addressed by `/`-separated keys.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    fn kind(&self) -> StorageKind;

    async fn save(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Handle shared by every component needing blob storage.
pub type SharedStorage = Arc<dyn Storage>;

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Local,
    AwsS3,
    TencentCos,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::AwsS3 => "aws_s3",
            StorageKind::TencentCos => "tencent_cos",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "aws_s3" => Ok(StorageKind::AwsS3),
            "tencent_cos" => Ok(StorageKind::TencentCos),
            _ => Err(StorageError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid plugin storage type: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} storage configuration: {reason}")]
    InvalidConfig { kind: StorageKind, reason: String },
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage responded {status} for '{key}'")]
    Status { status: u16, key: String },
}

impl StorageError {
    fn invalid(kind: StorageKind, reason: impl Into<String>) -> Self {
        StorageError::InvalidConfig {
            kind,
            reason: reason.into(),
        }
    }
}

/// Construct the single storage handle for this process.
pub fn select_storage(config: &StorageConfig) -> Result<SharedStorage, StorageError> {
    let kind: StorageKind = config.kind.parse()?;

    let storage: SharedStorage = match kind {
        StorageKind::Local => Arc::new(LocalStorage::new(&config.local.root)?),
        StorageKind::AwsS3 => Arc::new(ObjectStore::s3(&config.s3, &config.bucket)?),
        StorageKind::TencentCos => {
            Arc::new(ObjectStore::tencent_cos(&config.tencent_cos, &config.bucket)?)
        }
    };

    tracing::info!(kind = %kind, "Plugin storage initialized");
    Ok(storage)
}

/// Reject keys that could escape the bucket or root directory.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

pub(crate) fn observe<T>(
    kind: StorageKind,
    op: &'static str,
    result: Result<T, StorageError>,
) -> Result<T, StorageError> {
    metrics::record_storage_op(kind.as_str(), op, result.is_ok());
    result
}
