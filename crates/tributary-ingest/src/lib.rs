//! Tributary Ingest - Idempotent incremental ingestion
//!
//! Drives the pipeline `list → filter → (synchronize) → read → emit` for each
//! configured source:
//!
//! - [`lister`] - local directory listing and optional sorting
//! - [`filter`] - name, hidden-file and accept-once filters in a short-circuiting chain
//! - [`synchronizer`] - crash-safe mirroring of remote entries (temp file + rename)
//! - [`reader`] - turns a local file into messages (`contents`, `lines`, `ref`)
//! - [`poller`] - the poll cycle with idle backoff and fetch cap
//! - [`tailer`] - native and polling tailers for a single growing file
//! - [`source`] - builds runnable sources from configuration
//!
//! Outbound messages are delivered on a `tokio::sync::mpsc` channel; the
//! consumer decides where they go.

pub mod filter;
pub mod lister;
pub mod poller;
pub mod reader;
pub mod source;
pub mod synchronizer;
pub mod tailer;

pub use filter::{
    AcceptOnceFilter, FilterChain, HiddenFileFilter, IEntryFilter, KeyScope, NameFilter,
    PersistentAcceptOnceFilter,
};
pub use lister::{sort_entries, LocalDirectoryLister};
pub use poller::{EntryHandler, Poller, PollerOptions};
pub use reader::ContentReader;
pub use source::{build_source, remote_source, Source};
pub use synchronizer::{Synchronizer, SynchronizerOptions};
pub use tailer::{NativeTailer, PollingTailer, TailEvent, TailHandle, TailSource};

use thiserror::Error;
use tributary_core::domain::DomainError;

/// Errors raised by the ingestion pipeline
///
/// `Configuration` is fatal at startup. Every other variant fails the current
/// poll cycle only; the poller logs it and retries on the next cycle.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A source cannot be built from its configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A local file operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The cursor store could not be read or written
    #[error("Cursor store error: {0:#}")]
    Store(anyhow::Error),

    /// Listing the source root failed
    #[error("Listing failed: {0:#}")]
    Listing(anyhow::Error),

    /// Copying remote content into the mirror directory failed
    #[error("Transfer failed: {0:#}")]
    Transfer(anyhow::Error),

    /// A payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A domain-level error propagated from tributary-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The receiving side of the message channel was dropped
    #[error("Message channel closed")]
    Closed,
}
