//! Runnable sources built from configuration
//!
//! [`build_source`] assembles, for one [`SourceConfig`], the lister, the
//! filter chain and the entry handler, and wraps them in a [`Source`]. The
//! filter order is fixed: hidden files, then the name filter, then the
//! accept-once filter, so the cursor store is only consulted for entries that
//! can be emitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tributary_core::config::{DedupMode, FileSourceConfig, RemoteSourceConfig, SourceConfig};
use tributary_core::domain::Message;
use tributary_core::ports::{ICursorStore, IEntryLister, IRemoteTransfer};

use crate::filter::{
    AcceptOnceFilter, FilterChain, HiddenFileFilter, KeyScope, NameFilter,
    PersistentAcceptOnceFilter,
};
use crate::lister::LocalDirectoryLister;
use crate::poller::{EntryHandler, Poller, PollerOptions};
use crate::reader::ContentReader;
use crate::synchronizer::{Synchronizer, SynchronizerOptions};
use crate::tailer::TailSource;
use crate::IngestError;

pub enum Source {
    Polling(Poller),
    Tail(TailSource),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::Polling(poller) => poller.name(),
            Source::Tail(tail) => tail.name(),
        }
    }

    /// Runs until `cancel` fires or the message channel closes
    pub async fn run(self, tx: Sender<Message>, cancel: CancellationToken) -> Result<(), IngestError> {
        match self {
            Source::Polling(poller) => poller.run(tx, cancel).await,
            Source::Tail(tail) => tail.run(tx, cancel).await,
        }
    }

    /// Runs a single poll cycle; tail sources have none and emit nothing
    pub async fn run_once(&self, tx: &Sender<Message>) -> Result<usize, IngestError> {
        match self {
            Source::Polling(poller) => {
                poller.prepare().await?;
                poller.poll_once(tx).await
            }
            Source::Tail(tail) => {
                warn!(source = tail.name(), "Tail sources do not poll, skipping single cycle");
                Ok(0)
            }
        }
    }
}

/// Builds the source described by `config` on top of `store`
pub async fn build_source(
    config: &SourceConfig,
    store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError> {
    let source = match config {
        SourceConfig::File(file) => file_source(file, store)?,
        SourceConfig::Tail(tail) => Source::Tail(TailSource::new(tail.clone())),
        SourceConfig::Sftp(sftp) => sftp_source(sftp, store).await?,
        SourceConfig::S3(s3) => s3_source(s3, store).await?,
    };
    info!(source = source.name(), kind = config.kind(), "Source built");
    Ok(source)
}

fn name_filter(pattern: Option<&str>, regex: Option<&str>, chain: &mut FilterChain) -> Result<(), IngestError> {
    if let Some(filter) = NameFilter::from_options(pattern, regex)? {
        chain.push(Box::new(filter));
    }
    Ok(())
}

fn absolute(dir: &Path) -> Result<PathBuf, IngestError> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

fn file_source(config: &FileSourceConfig, store: Arc<dyn ICursorStore>) -> Result<Source, IngestError> {
    let mut chain = FilterChain::new();
    if config.ignore_hidden {
        chain.push(Box::new(HiddenFileFilter));
    }
    name_filter(
        config.filename_pattern.as_deref(),
        config.filename_regex.as_deref(),
        &mut chain,
    )?;
    if config.prevent_duplicates {
        match config.dedup {
            DedupMode::Modified => {
                let filter = PersistentAcceptOnceFilter::new(store, config.key_prefix())
                    .with_scope(KeyScope::Absolute(absolute(&config.directory)?))
                    .with_strategy(config.accept_strategy)?;
                chain.push(Box::new(filter));
            }
            DedupMode::Path => chain.push(Box::new(AcceptOnceFilter::new())),
        }
    }

    let root = config.directory.to_str().ok_or_else(|| {
        IngestError::Configuration(format!(
            "directory of source '{}' is not valid UTF-8",
            config.name
        ))
    })?;
    let handler = EntryHandler::Local {
        directory: config.directory.clone(),
        reader: ContentReader::from_config(&config.consumer)?,
    };
    let options = PollerOptions {
        delay_when_empty: Duration::from_millis(config.delay_when_empty_ms),
        max_fetch_size: config.max_fetch_size,
        sort: config.sort,
        rollback_on_failure: false,
    };

    Ok(Source::Polling(Poller::new(
        &config.name,
        root,
        Arc::new(LocalDirectoryLister::new()),
        chain,
        handler,
        options,
    )))
}

/// Builds a polling source over any remote adapter
///
/// Entries are keyed `key_prefix + path`, or `key_prefix + root + "-" + path`
/// in listing-only mode.
pub fn remote_source<C, R>(
    config: &RemoteSourceConfig<C>,
    key_prefix: &str,
    remote: Arc<R>,
    store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError>
where
    R: IRemoteTransfer + 'static,
{
    let mut chain = FilterChain::new();
    name_filter(
        config.filename_pattern.as_deref(),
        config.filename_regex.as_deref(),
        &mut chain,
    )?;
    let scope = if config.list_only {
        KeyScope::Root(config.remote_directory.clone())
    } else {
        KeyScope::Relative
    };
    chain.push(Box::new(
        PersistentAcceptOnceFilter::new(store, key_prefix)
            .with_scope(scope)
            .with_strategy(config.accept_strategy)?,
    ));

    let reader = ContentReader::from_config(&config.consumer)?;
    let lister: Arc<dyn IEntryLister> = remote.clone();
    let handler = if config.list_only {
        EntryHandler::ListOnly
    } else {
        let transfer: Arc<dyn IRemoteTransfer> = remote;
        let options = SynchronizerOptions {
            remote_root: config.remote_directory.clone(),
            local_directory: config.local_directory.clone(),
            auto_create_local_directory: config.auto_create_local_directory,
            temporary_file_suffix: config.temporary_file_suffix.clone(),
            preserve_timestamp: config.preserve_timestamp,
            delete_remote_files: config.delete_remote_files,
        };
        EntryHandler::Mirror {
            synchronizer: Synchronizer::new(transfer, options),
            reader,
        }
    };
    let options = PollerOptions {
        delay_when_empty: Duration::from_millis(config.delay_when_empty_ms),
        max_fetch_size: config.max_fetch_size,
        sort: config.sort,
        rollback_on_failure: config.rollback_on_failure,
    };

    Ok(Source::Polling(Poller::new(
        &config.name,
        &config.remote_directory,
        lister,
        chain,
        handler,
        options,
    )))
}

#[cfg(feature = "sftp")]
async fn sftp_source(
    config: &RemoteSourceConfig<tributary_core::config::SftpConnectionConfig>,
    store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError> {
    let remote = Arc::new(tributary_remote::SftpRemote::new(config.connection.clone()));
    remote_source(config, config.key_prefix(), remote, store)
}

#[cfg(not(feature = "sftp"))]
async fn sftp_source(
    _config: &RemoteSourceConfig<tributary_core::config::SftpConnectionConfig>,
    _store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError> {
    Err(IngestError::Configuration(
        tributary_remote::RemoteError::ProtocolDisabled("sftp").to_string(),
    ))
}

#[cfg(feature = "s3")]
async fn s3_source(
    config: &RemoteSourceConfig<tributary_core::config::S3ConnectionConfig>,
    store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError> {
    let remote = Arc::new(tributary_remote::S3Remote::connect(&config.connection).await);
    remote_source(config, config.key_prefix(), remote, store)
}

#[cfg(not(feature = "s3"))]
async fn s3_source(
    _config: &RemoteSourceConfig<tributary_core::config::S3ConnectionConfig>,
    _store: Arc<dyn ICursorStore>,
) -> Result<Source, IngestError> {
    Err(IngestError::Configuration(
        tributary_remote::RemoteError::ProtocolDisabled("s3").to_string(),
    ))
}
