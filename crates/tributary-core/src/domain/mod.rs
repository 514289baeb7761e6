//! Domain entities for the ingestion pipeline
//!
//! - Listed entries and their cursor keys
//! - Transient mirror files produced by the synchronizer
//! - Outbound messages and file markers
//! - Domain-specific error types

pub mod entry;
pub mod errors;
pub mod message;

pub use entry::{CursorKey, CursorRecord, LocalMirrorFile, SourceEntry};
pub use errors::DomainError;
pub use message::{headers, FileMarker, Mark, Message, Payload};
