//! Process-local cursor store
//!
//! Backed by a [`DashMap`], so concurrent sources never block each other.
//! Nothing survives a restart; use it for tests or for sources where
//! re-emission after restart is acceptable.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tributary_core::ports::ICursorStore;

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    records: DashMap<String, String>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl ICursorStore for MemoryCursorStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.records.remove(key).map(|(_, v)| v))
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(None)
            }
        }
    }

    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        match self.records.get_mut(key) {
            Some(mut current) if current.value() == expected => {
                *current = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
