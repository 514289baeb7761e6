//! Port definitions (hexagonal architecture interfaces)
//!
//! - [`ICursorStore`] - Durable key/value store of last-seen entry markers
//! - [`IEntryLister`] - Enumerates a directory-like namespace
//! - [`IRemoteTransfer`] - Copies or deletes remote entries

pub mod cursor_store;
pub mod remote;

pub use cursor_store::ICursorStore;
pub use remote::{IEntryLister, IRemoteTransfer};
