//! Cursor store port (driven/secondary port)
//!
//! A cursor store records, per entry key, the last modification marker that
//! was accepted. It is the only state shared between poller instances.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because failures are backend-specific (SQL,
//!   Redis, Zookeeper, HTTP...). Callers must treat any error as a failed
//!   poll cycle, never as "seen" or "unseen".
//! - Implementations give read-your-writes consistency within one process.
//!   No cross-process locking is performed here; the backend is the source
//!   of truth for multi-instance deployments.
//! - `put_if_absent` and `replace` are optional. Backends that can execute
//!   them atomically override them together with
//!   [`supports_compare_and_set`](ICursorStore::supports_compare_and_set).

use crate::domain::DomainError;

/// Port trait for durable "last seen marker" storage
#[async_trait::async_trait]
pub trait ICursorStore: Send + Sync {
    /// Short backend name used in logs and errors, e.g. `"redis"`
    fn backend_name(&self) -> &'static str;

    /// Returns the stored value for `key`, or `None` if it was never written
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Removes `key`, returning the value it held
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Whether `put_if_absent` and `replace` are atomic on this backend
    fn supports_compare_and_set(&self) -> bool {
        false
    }

    /// Stores `value` only if `key` is absent
    ///
    /// Returns `None` when the value was stored, or the existing value.
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        let _ = (key, value);
        Err(DomainError::Unsupported {
            backend: self.backend_name().to_string(),
            operation: "put_if_absent".to_string(),
        }
        .into())
    }

    /// Replaces `expected` with `value`; returns false if the stored value differed
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let _ = (key, expected, value);
        Err(DomainError::Unsupported {
            backend: self.backend_name().to_string(),
            operation: "replace".to_string(),
        }
        .into())
    }
}
