//! Ingestion service
//!
//! Opens the configured cursor store, builds every source and runs them as
//! independent tasks that share one outbound channel. A source that fails to
//! build aborts startup; a source that fails while running is logged and
//! does not stop the others.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tributary_core::config::{Config, SourceConfig, ValidationError};
use tributary_core::domain::Message;
use tributary_core::ports::ICursorStore;
use tributary_ingest::{build_source, IngestError, Source};

use crate::sink;

/// Capacity of the channel between sources and the sink
const CHANNEL_CAPACITY: usize = 1024;

/// Configuration problems that only show up in this build
///
/// Backends and protocols are cargo features; selecting one that was not
/// compiled in is reported like any other validation error.
pub fn feature_errors(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let backend = config.cursor_store.backend;
    if !tributary_cursor::backend_available(backend) {
        errors.push(ValidationError {
            field: "cursor_store.backend".into(),
            message: format!(
                "backend '{}' is not compiled in (enable feature '{}')",
                backend.name(),
                backend.name()
            ),
        });
    }
    for (i, source) in config.sources.iter().enumerate() {
        let protocol = match source {
            SourceConfig::Sftp(_) => "sftp",
            SourceConfig::S3(_) => "s3",
            SourceConfig::File(_) | SourceConfig::Tail(_) => continue,
        };
        if !tributary_remote::protocol_available(protocol) {
            errors.push(ValidationError {
                field: format!("sources[{i}].kind"),
                message: format!("protocol '{protocol}' is not compiled in (enable feature '{protocol}')"),
            });
        }
    }
    errors
}

/// Every validation error for `config` in this build
pub fn validate(config: &Config) -> Vec<ValidationError> {
    let mut errors = config.validate();
    errors.extend(feature_errors(config));
    errors
}

pub struct IngestService {
    config: Config,
    store: Arc<dyn ICursorStore>,
    shutdown: CancellationToken,
}

impl IngestService {
    /// Validates the configuration and opens the cursor store
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let errors = validate(&config);
        if !errors.is_empty() {
            for e in &errors {
                error!(field = %e.field, "{}", e.message);
            }
            bail!("Configuration has {} error(s)", errors.len());
        }

        let store = tributary_cursor::open_store(&config.cursor_store)
            .await
            .context("Failed to open cursor store")?;

        Ok(Self {
            config,
            store,
            shutdown,
        })
    }

    pub fn store(&self) -> &Arc<dyn ICursorStore> {
        &self.store
    }

    /// Builds the configured sources, optionally restricted to `only`
    async fn build_sources(&self, only: &[String]) -> Result<Vec<Source>> {
        for name in only {
            if !self.config.sources.iter().any(|s| s.name() == name) {
                bail!("No source named '{name}' in configuration");
            }
        }

        let mut sources = Vec::new();
        for config in &self.config.sources {
            if !only.is_empty() && !only.iter().any(|n| n == config.name()) {
                continue;
            }
            let source = build_source(config, Arc::clone(&self.store))
                .await
                .with_context(|| format!("Failed to build source '{}'", config.name()))?;
            sources.push(source);
        }
        if sources.is_empty() {
            warn!("No sources configured");
        }
        Ok(sources)
    }

    /// Runs every source until shutdown, writing messages to stdout
    pub async fn run(&self, only: &[String]) -> Result<()> {
        let sources = self.build_sources(only).await?;
        let (tx, rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let sink = tokio::spawn(sink::drain(rx, tokio::io::stdout()));

        let mut tasks = JoinSet::new();
        for source in sources {
            let tx = tx.clone();
            let cancel = self.shutdown.child_token();
            tasks.spawn(async move {
                let name = source.name().to_string();
                (name, source.run(tx, cancel).await)
            });
        }
        // the sink finishes once every source dropped its sender
        drop(tx);

        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(source = %name, "Source finished"),
                Ok((name, Err(IngestError::Closed))) => {
                    warn!(source = %name, "Source stopped, output closed");
                }
                Ok((name, Err(e))) => {
                    failed += 1;
                    error!(source = %name, error = %e, "Source failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "Source task panicked");
                }
            }
        }

        let written = sink.await.context("Sink task panicked")??;
        info!(messages = written, "All sources stopped");
        if failed > 0 {
            bail!("{failed} source(s) failed");
        }
        Ok(())
    }

    /// Runs one poll cycle per source, then flushes the output
    pub async fn run_once(&self, only: &[String]) -> Result<usize> {
        let sources = self.build_sources(only).await?;
        let (tx, rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let sink = tokio::spawn(sink::drain(rx, tokio::io::stdout()));

        let mut accepted = 0;
        let mut failed = 0usize;
        for source in &sources {
            if self.shutdown.is_cancelled() {
                break;
            }
            match source.run_once(&tx).await {
                Ok(n) => {
                    info!(source = source.name(), accepted = n, "Cycle complete");
                    accepted += n;
                }
                Err(e) => {
                    failed += 1;
                    error!(source = source.name(), error = %e, "Cycle failed");
                }
            }
        }
        drop(tx);

        sink.await.context("Sink task panicked")??;
        if failed > 0 {
            bail!("{failed} source(s) failed");
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tributary_core::config::{CursorBackend, FileSourceConfig};

    use super::*;

    #[test]
    fn test_feature_errors_for_default_build() {
        let mut config = Config::default();
        assert!(feature_errors(&config).is_empty());

        config.cursor_store.backend = CursorBackend::Hazelcast;
        assert!(feature_errors(&config).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_filter_is_rejected() {
        let service = IngestService::new(Config::default(), CancellationToken::new())
            .await
            .unwrap();
        let result = service.build_sources(&["missing".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_builds_only_selected_sources() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config
            .sources
            .push(SourceConfig::File(FileSourceConfig::new("a", dir.path())));
        config
            .sources
            .push(SourceConfig::File(FileSourceConfig::new("b", dir.path())));

        let service = IngestService::new(config, CancellationToken::new())
            .await
            .unwrap();
        let sources = service.build_sources(&["b".to_string()]).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), "b");
    }

    #[tokio::test]
    async fn test_invalid_config_fails_startup() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(IngestService::new(config, CancellationToken::new()).await.is_err());
    }
}
