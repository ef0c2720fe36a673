//! Plugin manager.
//!
//! # Responsibilities
//! - Keep the registry of installed plugins
//! - Store plugin packages and manifests in plugin storage
//! - Announce every registration to the registered handlers (the cluster)
//!
//! # Storage layout
//! ```text
//! <installed_path>/<author>/<name>/<version>/manifest.json
//! <installed_path>/<author>/<name>/<version>/package.difypkg
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::PluginConfig;
use crate::storage::{SharedStorage, StorageError};

const MANIFEST_FILE: &str = "manifest.json";
const PACKAGE_FILE: &str = "package.difypkg";

/// Identity and metadata of an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    pub author: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

impl PluginDeclaration {
    pub fn new(author: &str, name: &str, version: &str) -> Self {
        Self {
            author: author.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
        }
    }

    /// `author/name:version`
    pub fn identity(&self) -> String {
        format!("{}/{}:{}", self.author, self.name, self.version)
    }

    fn validate(&self) -> Result<(), PluginError> {
        for (field, value) in [
            ("author", &self.author),
            ("name", &self.name),
            ("version", &self.version),
        ] {
            let ok = !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                && value != "."
                && value != "..";
            if !ok {
                return Err(PluginError::InvalidDeclaration(format!(
                    "{field} '{value}' must be non-empty [A-Za-z0-9._-]"
                )));
            }
        }
        Ok(())
    }
}

/// Callback run for every plugin registration.
pub type RegisterHandler = Arc<dyn Fn(&PluginDeclaration) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid plugin declaration: {0}")]
    InvalidDeclaration(String),
    #[error("plugin package is {size} bytes, limit is {limit}")]
    PackageTooLarge { size: usize, limit: usize },
    #[error("plugin manager already launched")]
    AlreadyLaunched,
}

pub struct PluginManager {
    storage: SharedStorage,
    config: PluginConfig,
    plugins: DashMap<String, PluginDeclaration>,
    handlers: RwLock<Vec<RegisterHandler>>,
    launched: AtomicBool,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("storage", &self.storage.kind())
            .field("plugins", &self.plugins.len())
            .field("launched", &self.is_launched())
            .finish()
    }
}

impl PluginManager {
    pub fn new(storage: SharedStorage, config: &PluginConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
            plugins: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
            launched: AtomicBool::new(false),
        }
    }

    pub fn add_register_handler(&self, handler: RegisterHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    /// Registered plugins, sorted by identity.
    pub fn plugins(&self) -> Vec<PluginDeclaration> {
        let mut plugins: Vec<_> = self.plugins.iter().map(|e| e.value().clone()).collect();
        plugins.sort_by_key(PluginDeclaration::identity);
        plugins
    }

    pub fn get(&self, identity: &str) -> Option<PluginDeclaration> {
        self.plugins.get(identity).map(|e| e.value().clone())
    }

    /// Store a package and its manifest, then register the plugin.
    pub async fn install(
        &self,
        declaration: PluginDeclaration,
        package: &[u8],
    ) -> Result<(), PluginError> {
        declaration.validate()?;
        if package.len() > self.config.max_package_size {
            return Err(PluginError::PackageTooLarge {
                size: package.len(),
                limit: self.config.max_package_size,
            });
        }

        let dir = self.plugin_dir(&declaration);
        let manifest = serde_json::to_vec(&declaration)
            .map_err(|e| PluginError::InvalidDeclaration(e.to_string()))?;
        self.storage
            .save(&format!("{dir}/{PACKAGE_FILE}"), package)
            .await?;
        // manifest last: a listed manifest implies a complete package
        self.storage
            .save(&format!("{dir}/{MANIFEST_FILE}"), &manifest)
            .await?;

        self.register(declaration);
        Ok(())
    }

    pub async fn package(&self, declaration: &PluginDeclaration) -> Result<Vec<u8>, PluginError> {
        let dir = self.plugin_dir(declaration);
        Ok(self.storage.load(&format!("{dir}/{PACKAGE_FILE}")).await?)
    }

    /// Register every plugin already installed in storage.
    ///
    /// Returns the number of plugins registered. Unreadable manifests are
    /// skipped.
    pub async fn launch(&self) -> Result<usize, PluginError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(PluginError::AlreadyLaunched);
        }

        let keys = self.storage.list(&self.config.installed_path).await?;
        let mut registered = 0;
        for key in keys.iter().filter(|k| k.ends_with(&format!("/{MANIFEST_FILE}"))) {
            let bytes = self.storage.load(key).await?;
            match serde_json::from_slice::<PluginDeclaration>(&bytes) {
                Ok(declaration) if declaration.validate().is_ok() => {
                    self.register(declaration);
                    registered += 1;
                }
                Ok(_) => tracing::warn!(manifest = %key, "Skipping manifest with invalid declaration"),
                Err(e) => tracing::warn!(manifest = %key, error = %e, "Skipping unreadable manifest"),
            }
        }

        tracing::info!(registered, "Plugin manager launched");
        Ok(registered)
    }

    fn register(&self, declaration: PluginDeclaration) {
        let identity = declaration.identity();
        tracing::info!(plugin = %identity, "Plugin registered");

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(&declaration);
        }
        self.plugins.insert(identity, declaration);
    }

    fn plugin_dir(&self, d: &PluginDeclaration) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.installed_path.trim_end_matches('/'),
            d.author,
            d.name,
            d.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::sync::Mutex;

    fn manager(dir: &tempfile::TempDir) -> PluginManager {
        let storage: SharedStorage = Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());
        PluginManager::new(storage, &PluginConfig::default())
    }

    #[tokio::test]
    async fn test_install_announces_to_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        manager.add_register_handler(Arc::new(move |p: &PluginDeclaration| {
            s.lock().unwrap().push(p.identity());
        }));

        manager
            .install(PluginDeclaration::new("langgenius", "openai", "0.1.0"), b"pkg")
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["langgenius/openai:0.1.0"]);
        assert!(manager.get("langgenius/openai:0.1.0").is_some());
        assert_eq!(
            manager
                .package(&PluginDeclaration::new("langgenius", "openai", "0.1.0"))
                .await
                .unwrap(),
            b"pkg"
        );
    }

    #[tokio::test]
    async fn test_launch_registers_installed_plugins() {
        let dir = tempfile::tempdir().unwrap();
        {
            let first = manager(&dir);
            first
                .install(PluginDeclaration::new("a", "one", "1.0.0"), b"1")
                .await
                .unwrap();
            first
                .install(PluginDeclaration::new("b", "two", "2.0.0"), b"2")
                .await
                .unwrap();
        }
        std::fs::create_dir_all(dir.path().join("plugin/c/bad/1")).unwrap();
        std::fs::write(dir.path().join("plugin/c/bad/1/manifest.json"), b"not json").unwrap();

        let second = manager(&dir);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        second.add_register_handler(Arc::new(move |_: &PluginDeclaration| {
            *c.lock().unwrap() += 1;
        }));

        assert_eq!(second.launch().await.unwrap(), 2);
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(
            second.plugins().iter().map(|p| p.identity()).collect::<Vec<_>>(),
            vec!["a/one:1.0.0", "b/two:2.0.0"]
        );
        assert!(matches!(second.launch().await, Err(PluginError::AlreadyLaunched)));
    }

    #[tokio::test]
    async fn test_install_limits() {
        let dir = tempfile::tempdir().unwrap();
        let storage: SharedStorage = Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());
        let manager = PluginManager::new(
            storage,
            &PluginConfig {
                max_package_size: 2,
                ..PluginConfig::default()
            },
        );

        let err = manager
            .install(PluginDeclaration::new("a", "b", "1"), b"too big")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PackageTooLarge { size: 7, limit: 2 }));

        let err = manager
            .install(PluginDeclaration::new("..", "b", "1"), b"")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidDeclaration(_)));
    }
}
