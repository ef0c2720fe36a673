//! Database connection state.
//!
//! The daemon only needs to know its database is reachable before it
//! starts serving; query layers are built on top of the returned handle.

use std::time::Duration;

use tokio::net::TcpStream;
use url::Url;

use crate::config::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("invalid database url: {0}")]
    InvalidUrl(String),
    #[error("unsupported database scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("database {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Mysql,
    /// No database configured; state lives in memory.
    Memory,
}

impl Backend {
    fn from_scheme(scheme: &str) -> Option<(Self, u16)> {
        match scheme {
            "postgres" | "postgresql" => Some((Backend::Postgres, 5432)),
            "mysql" => Some((Backend::Mysql, 3306)),
            _ => None,
        }
    }
}

/// Reachable database endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub backend: Backend,
    /// `host:port`, empty in memory mode.
    pub address: String,
    pub name: String,
}

impl Database {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            address: String::new(),
            name: String::new(),
        }
    }

    /// Resolve the configured URL and check the server accepts connections.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let Some(raw) = config.url.as_deref() else {
            tracing::warn!("No database configured, keeping state in memory");
            return Ok(Self::memory());
        };

        let database = Self::resolve(raw)?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        match tokio::time::timeout(timeout, TcpStream::connect(&database.address)).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => {
                return Err(DatabaseError::Unreachable {
                    address: database.address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DatabaseError::Unreachable {
                    address: database.address,
                    reason: format!("no answer within {}s", config.connect_timeout_secs),
                })
            }
        }

        tracing::info!(backend = ?database.backend, address = %database.address, database = %database.name, "Database connected");
        Ok(database)
    }

    /// Parse a database URL without touching the network.
    pub fn resolve(raw: &str) -> Result<Self, DatabaseError> {
        // the password never reaches an error message
        let url = Url::parse(raw).map_err(|e| DatabaseError::InvalidUrl(e.to_string()))?;
        let (backend, default_port) = Backend::from_scheme(url.scheme())
            .ok_or_else(|| DatabaseError::UnsupportedScheme(url.scheme().to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DatabaseError::InvalidUrl("missing host".to_string()))?;

        Ok(Self {
            backend,
            address: format!("{host}:{}", url.port().unwrap_or(default_port)),
            name: url.path().trim_start_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_resolve_defaults_port() {
        let db = Database::resolve("postgres://user:pw@db.internal/dify_plugin").unwrap();
        assert_eq!(db.backend, Backend::Postgres);
        assert_eq!(db.address, "db.internal:5432");
        assert_eq!(db.name, "dify_plugin");
    }

    #[test]
    fn test_resolve_rejects_unknown_scheme() {
        assert!(matches!(
            Database::resolve("redis://localhost:6379"),
            Err(DatabaseError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            Database::resolve("not a url"),
            Err(DatabaseError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_without_url_is_memory() {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        assert_eq!(db.backend, Backend::Memory);
    }

    #[tokio::test]
    async fn test_connect_reaches_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = DatabaseConfig {
            url: Some(format!("mysql://root@127.0.0.1:{port}/plugins")),
            connect_timeout_secs: 2,
        };
        let db = Database::connect(&config).await.unwrap();
        assert_eq!(db.backend, Backend::Mysql);

        drop(listener);
        let err = Database::connect(&config).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Unreachable { .. }));
    }
}
