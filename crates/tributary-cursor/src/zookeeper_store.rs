//! Zookeeper cursor store
//!
//! One persistent znode per key under a configured root; the key is
//! percent-encoded into a single node name and the value is the node data.
//! The client is synchronous, so every call runs on the blocking pool.
//! Conditional writes use znode versions.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use tributary_core::config::ZookeeperStoreConfig;
use tributary_core::ports::ICursorStore;
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError, ZooKeeper, ZooKeeperExt};

use crate::CursorError;

struct SessionWatcher;

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        tracing::debug!(state = ?event.keeper_state, "Zookeeper session event");
    }
}

pub struct ZookeeperCursorStore {
    client: Arc<ZooKeeper>,
    root: String,
}

impl ZookeeperCursorStore {
    pub async fn connect(config: &ZookeeperStoreConfig) -> Result<Self, CursorError> {
        let connect_string = config.connect_string.clone();
        let root = config.root.trim_end_matches('/').to_string();
        let timeout = Duration::from_millis(config.session_timeout_ms);

        let ensure_root = root.clone();
        let client = tokio::task::spawn_blocking(move || -> Result<ZooKeeper, CursorError> {
            let zk = ZooKeeper::connect(&connect_string, timeout, SessionWatcher).map_err(|e| {
                CursorError::ConnectionFailed(format!("Failed to connect to {connect_string}: {e}"))
            })?;
            if !ensure_root.is_empty() {
                zk.ensure_path(&ensure_root).map_err(|e| {
                    CursorError::ConnectionFailed(format!("Failed to create {ensure_root}: {e}"))
                })?;
            }
            Ok(zk)
        })
        .await
        .map_err(|e| CursorError::ConnectionFailed(e.to_string()))??;

        tracing::debug!(root = %root, "Zookeeper cursor store connected");

        Ok(Self {
            client: Arc::new(client),
            root,
        })
    }

    fn node_path(&self, key: &str) -> String {
        node_path(&self.root, key)
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ZooKeeper) -> anyhow::Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client)).await?
    }
}

/// Child of `root` named by the percent-encoded key, so `/` never nests
fn node_path(root: &str, key: &str) -> String {
    format!("{}/{}", root, urlencoding::encode(key))
}

fn utf8(data: Vec<u8>) -> anyhow::Result<String> {
    Ok(String::from_utf8(data)?)
}

#[async_trait::async_trait]
impl ICursorStore for ZookeeperCursorStore {
    fn backend_name(&self) -> &'static str {
        "zookeeper"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.node_path(key);
        self.blocking(move |zk| match zk.get_data(&path, false) {
            Ok((data, _)) => Ok(Some(utf8(data)?)),
            Err(ZkError::NoNode) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.node_path(key);
        let value = value.to_string();
        self.blocking(move |zk| loop {
            match zk.set_data(&path, value.clone().into_bytes(), None) {
                Ok(_) => return Ok(()),
                Err(ZkError::NoNode) => {}
                Err(e) => return Err(e.into()),
            }
            match zk.create(
                &path,
                value.clone().into_bytes(),
                Acl::open_unsafe().clone(),
                CreateMode::Persistent,
            ) {
                Ok(_) => return Ok(()),
                // created concurrently; overwrite on the next pass
                Err(ZkError::NodeExists) => continue,
                Err(e) => return Err(e.into()),
            }
        })
        .await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.node_path(key);
        self.blocking(move |zk| loop {
            let (data, stat) = match zk.get_data(&path, false) {
                Ok(found) => found,
                Err(ZkError::NoNode) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            match zk.delete(&path, Some(stat.version)) {
                Ok(()) => return Ok(Some(utf8(data)?)),
                Err(ZkError::NoNode) => return Ok(None),
                Err(ZkError::BadVersion) => continue,
                Err(e) => return Err(e.into()),
            }
        })
        .await
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        let path = self.node_path(key);
        let value = value.to_string();
        self.blocking(move |zk| loop {
            match zk.create(
                &path,
                value.clone().into_bytes(),
                Acl::open_unsafe().clone(),
                CreateMode::Persistent,
            ) {
                Ok(_) => return Ok(None),
                Err(ZkError::NodeExists) => {}
                Err(e) => return Err(e.into()),
            }
            match zk.get_data(&path, false) {
                Ok((data, _)) => return Ok(Some(utf8(data)?)),
                // removed between create and read
                Err(ZkError::NoNode) => continue,
                Err(e) => return Err(e.into()),
            }
        })
        .await
    }

    #[instrument(skip(self))]
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let path = self.node_path(key);
        let expected = expected.to_string();
        let value = value.to_string();
        self.blocking(move |zk| {
            let (data, stat) = match zk.get_data(&path, false) {
                Ok(found) => found,
                Err(ZkError::NoNode) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if data != expected.as_bytes() {
                return Ok(false);
            }
            match zk.set_data(&path, value.into_bytes(), Some(stat.version)) {
                Ok(_) => Ok(true),
                Err(ZkError::BadVersion) | Err(ZkError::NoNode) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}
