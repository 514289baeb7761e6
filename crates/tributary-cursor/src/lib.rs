//! Tributary Cursor - Cursor store backends
//!
//! Every backend implements the `ICursorStore` port from `tributary-core`.
//! They are driven (secondary) adapters in the hexagonal architecture:
//!
//! - [`MemoryCursorStore`] - process-local map, lost on restart
//! - [`SqliteCursorStore`] - relational table in a SQLite file
//! - [`HazelcastCursorStore`] - Hazelcast map over the member REST API
//! - `RedisCursorStore` - one Redis hash (feature `redis`)
//! - `ZookeeperCursorStore` - one znode per key (feature `zookeeper`)
//! - `DynamoDbCursorStore` - one item per key (feature `dynamodb`)
//! - `MongoCursorStore` - one document per key (feature `mongodb`)
//!
//! ## Usage
//!
//! ```no_run
//! use tributary_core::config::CursorStoreConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = tributary_cursor::open_store(&CursorStoreConfig::default()).await?;
//! store.put("sftpSource/a.txt", "1700000000000").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tributary_core::config::{CursorBackend, CursorStoreConfig};
use tributary_core::ports::ICursorStore;

pub mod hazelcast;
pub mod memory;
pub mod sqlite;

#[cfg(feature = "dynamodb")]
pub mod dynamodb_store;
#[cfg(feature = "mongodb")]
pub mod mongo_store;
#[cfg(feature = "redis")]
pub mod redis_store;
#[cfg(feature = "zookeeper")]
pub mod zookeeper_store;

pub use hazelcast::HazelcastCursorStore;
pub use memory::MemoryCursorStore;
pub use sqlite::SqliteCursorStore;

#[cfg(feature = "dynamodb")]
pub use dynamodb_store::DynamoDbCursorStore;
#[cfg(feature = "mongodb")]
pub use mongo_store::MongoCursorStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCursorStore;
#[cfg(feature = "zookeeper")]
pub use zookeeper_store::ZookeeperCursorStore;

/// Errors that can occur while opening or talking to a cursor store
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// Failed to establish a connection to the backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write against the backend failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The backend answered with something we cannot interpret
    #[error("Unexpected response from {backend}: {detail}")]
    UnexpectedResponse {
        backend: &'static str,
        detail: String,
    },

    /// The backend was selected but its cargo feature is not enabled
    #[error("Cursor store backend '{backend}' is not compiled in (enable feature '{feature}')")]
    BackendDisabled {
        backend: &'static str,
        feature: &'static str,
    },
}

impl From<sqlx::Error> for CursorError {
    fn from(e: sqlx::Error) -> Self {
        CursorError::QueryFailed(e.to_string())
    }
}

/// Whether `backend` was compiled into this build
pub fn backend_available(backend: CursorBackend) -> bool {
    match backend {
        CursorBackend::Memory | CursorBackend::Sqlite | CursorBackend::Hazelcast => true,
        CursorBackend::Redis => cfg!(feature = "redis"),
        CursorBackend::Zookeeper => cfg!(feature = "zookeeper"),
        CursorBackend::Dynamodb => cfg!(feature = "dynamodb"),
        CursorBackend::Mongodb => cfg!(feature = "mongodb"),
    }
}

/// Opens the backend selected in `config`
///
/// The returned store is shared by every source of the process; sources keep
/// their records apart through their key prefix.
pub async fn open_store(config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    let store: Arc<dyn ICursorStore> = match config.backend {
        CursorBackend::Memory => Arc::new(MemoryCursorStore::new()),
        CursorBackend::Sqlite => Arc::new(SqliteCursorStore::open(&config.sqlite.path).await?),
        CursorBackend::Hazelcast => Arc::new(HazelcastCursorStore::new(&config.hazelcast)?),
        CursorBackend::Redis => open_redis(config).await?,
        CursorBackend::Zookeeper => open_zookeeper(config).await?,
        CursorBackend::Dynamodb => open_dynamodb(config).await?,
        CursorBackend::Mongodb => open_mongo(config).await?,
    };

    tracing::info!(backend = store.backend_name(), "Cursor store opened");
    Ok(store)
}

#[cfg(feature = "redis")]
async fn open_redis(config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Ok(Arc::new(RedisCursorStore::connect(&config.redis).await?))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Err(CursorError::BackendDisabled {
        backend: "redis",
        feature: "redis",
    })
}

#[cfg(feature = "zookeeper")]
async fn open_zookeeper(config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Ok(Arc::new(ZookeeperCursorStore::connect(&config.zookeeper).await?))
}

#[cfg(not(feature = "zookeeper"))]
async fn open_zookeeper(_config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Err(CursorError::BackendDisabled {
        backend: "zookeeper",
        feature: "zookeeper",
    })
}

#[cfg(feature = "dynamodb")]
async fn open_dynamodb(config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Ok(Arc::new(DynamoDbCursorStore::connect(&config.dynamodb).await?))
}

#[cfg(not(feature = "dynamodb"))]
async fn open_dynamodb(_config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Err(CursorError::BackendDisabled {
        backend: "dynamodb",
        feature: "dynamodb",
    })
}

#[cfg(feature = "mongodb")]
async fn open_mongo(config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Ok(Arc::new(MongoCursorStore::connect(&config.mongodb).await?))
}

#[cfg(not(feature = "mongodb"))]
async fn open_mongo(_config: &CursorStoreConfig) -> Result<Arc<dyn ICursorStore>, CursorError> {
    Err(CursorError::BackendDisabled {
        backend: "mongodb",
        feature: "mongodb",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_built_backends() {
        assert!(backend_available(CursorBackend::Memory));
        assert!(backend_available(CursorBackend::Sqlite));
        assert!(backend_available(CursorBackend::Hazelcast));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&CursorStoreConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert!(store.supports_compare_and_set());
    }

    #[tokio::test]
    async fn test_open_sqlite_store_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = CursorStoreConfig {
            backend: CursorBackend::Sqlite,
            ..CursorStoreConfig::default()
        };
        config.sqlite.path = dir.path().join("nested").join("cursor.db");

        let store = open_store(&config).await.unwrap();
        store.put("k", "1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
        assert!(config.sqlite.path.exists());
    }

    #[cfg(not(feature = "mongodb"))]
    #[tokio::test]
    async fn test_disabled_backend_is_an_error() {
        let config = CursorStoreConfig {
            backend: CursorBackend::Mongodb,
            ..CursorStoreConfig::default()
        };
        let err = open_store(&config).await.err().unwrap();
        assert!(matches!(err, CursorError::BackendDisabled { .. }));
    }
}
