//! Tributary Core - Domain model and port definitions
//!
//! This crate holds the pieces every other tributary crate agrees on:
//! - **Domain types** - `SourceEntry`, `CursorKey`, `LocalMirrorFile`, `Message`
//! - **Port definitions** - `ICursorStore`, `IEntryLister`, `IRemoteTransfer`
//! - **Configuration** - YAML-backed `Config` with exhaustive validation
//!
//! # Architecture
//!
//! Tributary follows the ports & adapters layout. Cursor store backends live
//! in `tributary-cursor`, SFTP and S3 adapters in `tributary-remote`, and the
//! ingestion pipeline that drives them in `tributary-ingest`. None of those
//! crates know about each other; they meet only through the traits defined
//! in [`ports`].

pub mod config;
pub mod domain;
pub mod ports;
