//! Redis cursor store
//!
//! All records of one store live in a single hash (`MetaData` by default),
//! one field per cursor key. Compound operations run as Lua scripts so they
//! are atomic on the server.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::instrument;
use tributary_core::config::RedisStoreConfig;
use tributary_core::ports::ICursorStore;

use crate::CursorError;

const REMOVE_SCRIPT: &str = r#"
local v = redis.call('HGET', KEYS[1], ARGV[1])
if v then redis.call('HDEL', KEYS[1], ARGV[1]) end
return v
"#;

const PUT_IF_ABSENT_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 1 then return false end
return redis.call('HGET', KEYS[1], ARGV[1])
"#;

const REPLACE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  return 1
end
return 0
"#;

pub struct RedisCursorStore {
    connection: ConnectionManager,
    hash: String,
    remove_script: Script,
    put_if_absent_script: Script,
    replace_script: Script,
}

impl RedisCursorStore {
    /// Connects to `config.url`; the connection manager reconnects on its own
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, CursorError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CursorError::ConnectionFailed(format!("Invalid Redis URL '{}': {}", config.url, e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            CursorError::ConnectionFailed(format!("Failed to connect to {}: {}", config.url, e))
        })?;

        tracing::debug!(url = %config.url, hash = %config.key, "Redis cursor store connected");

        Ok(Self {
            connection,
            hash: config.key.clone(),
            remove_script: Script::new(REMOVE_SCRIPT),
            put_if_absent_script: Script::new(PUT_IF_ABSENT_SCRIPT),
            replace_script: Script::new(REPLACE_SCRIPT),
        })
    }
}

#[async_trait::async_trait]
impl ICursorStore for RedisCursorStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.hget(&self.hash, key).await?;
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.hset(&self.hash, key, value).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection.clone();
        let previous: Option<String> = self
            .remove_script
            .key(&self.hash)
            .arg(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(previous)
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection.clone();
        let existing: Option<String> = self
            .put_if_absent_script
            .key(&self.hash)
            .arg(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(existing)
    }

    #[instrument(skip(self))]
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let mut conn = self.connection.clone();
        let replaced: i64 = self
            .replace_script
            .key(&self.hash)
            .arg(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(replaced == 1)
    }
}
