//! Listing and transfer ports
//!
//! Each protocol (local directory, SFTP, S3) is an independent struct that
//! implements [`IEntryLister`]. Protocols with remote bytes additionally
//! implement [`IRemoteTransfer`], which the synchronizer uses to mirror an
//! entry into a local directory.
//!
//! ## Design Notes
//!
//! - `root` is passed per call so one connection can serve several roots.
//! - Listers return regular files only; directories and symbolic links are
//!   dropped by the adapter.
//! - No ordering is guaranteed. Sorting is applied by the caller.
//! - Adapters never retry. A failure fails the poll cycle and the poller
//!   tries again on the next tick.

use std::path::Path;

use crate::domain::SourceEntry;

/// Enumerates the files below a root
#[async_trait::async_trait]
pub trait IEntryLister: Send + Sync {
    /// Protocol name, e.g. `"sftp"`
    fn protocol(&self) -> &'static str;

    /// Lists regular files directly below `root`
    async fn list(&self, root: &str) -> anyhow::Result<Vec<SourceEntry>>;
}

/// Moves remote bytes for one entry
#[async_trait::async_trait]
pub trait IRemoteTransfer: IEntryLister {
    /// Streams the entry's content into `dest`, returning the byte count
    ///
    /// `dest` is created or truncated. On error the caller owns cleanup of
    /// whatever was written.
    async fn download(&self, root: &str, entry: &SourceEntry, dest: &Path) -> anyhow::Result<u64>;

    /// Deletes the remote original
    async fn delete(&self, root: &str, entry: &SourceEntry) -> anyhow::Result<()>;
}
