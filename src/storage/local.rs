//! Local filesystem storage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::storage::{observe, validate_key, Storage, StorageError, StorageKind};

/// Stores each key as a file below `root`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create the root directory if needed.
    pub fn new(root: &str) -> Result<Self, StorageError> {
        if root.trim().is_empty() {
            return Err(StorageError::invalid(StorageKind::Local, "root directory is empty"));
        }

        let root = PathBuf::from(root);
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::invalid(
                StorageKind::Local,
                format!("can't create root {}: {e}", root.display()),
            )
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn save_inner(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn load_inner(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_of(key)?;
        fs::read(&path).await.map_err(|e| not_found(e, key))
    }

    async fn delete_inner(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_of(key)?;
        fs::remove_file(&path).await.map_err(|e| not_found(e, key))
    }

    async fn list_inner(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let start = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.path_of(prefix.trim_end_matches('/'))?
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn not_found(e: std::io::Error, key: &str) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn save(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        observe(self.kind(), "save", self.save_inner(key, data).await)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        observe(self.kind(), "load", self.load_inner(key).await)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let result = match self.path_of(key) {
            Ok(path) => fs::try_exists(&path).await.map_err(StorageError::from),
            Err(e) => Err(e),
        };
        observe(self.kind(), "exists", result)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        observe(self.kind(), "delete", self.delete_inner(key).await)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        observe(self.kind(), "list", self.list_inner(prefix).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_empty_root_rejected() {
        let err = LocalStorage::new("  ").unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig { kind: StorageKind::Local, .. }));
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let (_dir, storage) = storage();

        storage.save("plugin/a/pkg.difypkg", b"package").await.unwrap();
        assert!(storage.exists("plugin/a/pkg.difypkg").await.unwrap());
        assert_eq!(storage.load("plugin/a/pkg.difypkg").await.unwrap(), b"package");

        storage.save("plugin/a/pkg.difypkg", b"v2").await.unwrap();
        assert_eq!(storage.load("plugin/a/pkg.difypkg").await.unwrap(), b"v2");

        storage.delete("plugin/a/pkg.difypkg").await.unwrap();
        assert!(!storage.exists("plugin/a/pkg.difypkg").await.unwrap());
        assert!(matches!(
            storage.load("plugin/a/pkg.difypkg").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_sorted() {
        let (_dir, storage) = storage();
        for key in ["plugin/b/2", "plugin/a/1", "other/x", "plugin/a/deep/3"] {
            storage.save(key, b"").await.unwrap();
        }

        assert_eq!(
            storage.list("plugin").await.unwrap(),
            vec!["plugin/a/1", "plugin/a/deep/3", "plugin/b/2"]
        );
        assert_eq!(storage.list("").await.unwrap().len(), 4);
        assert!(storage.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.save("../escape", b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.exists("/etc/passwd").await.is_err());
    }
}
