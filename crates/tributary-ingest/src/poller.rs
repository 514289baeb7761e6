//! Poll cycle
//!
//! One [`Poller`] drives one source: `list → sort → filter → handle → emit`.
//! Entries are handled one at a time in listing (or sorted) order, and each
//! entry is accepted by the filter chain before it is synchronized or read.
//!
//! After a cycle that accepted nothing, or that failed, the poller waits
//! `delay_when_empty` before the next cycle; otherwise it polls again
//! immediately. `max_fetch_size` stops a cycle once that many entries were
//! accepted; the remaining entries are not evaluated, so their cursors are
//! untouched and they are picked up by a later cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tributary_core::config::SortSpec;
use tributary_core::domain::{headers, Message, Payload, SourceEntry};
use tributary_core::ports::IEntryLister;
use tributary_remote::join_remote;

use crate::filter::FilterChain;
use crate::lister::sort_entries;
use crate::reader::{send, ContentReader};
use crate::synchronizer::Synchronizer;
use crate::IngestError;

/// What happens to an accepted entry
pub enum EntryHandler {
    /// Local file: read it in place
    Local {
        directory: PathBuf,
        reader: ContentReader,
    },
    /// Remote file: mirror it locally, then read the mirror
    Mirror {
        synchronizer: Synchronizer,
        reader: ContentReader,
    },
    /// Remote file: emit its metadata as JSON, transfer nothing
    ListOnly,
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub delay_when_empty: Duration,
    pub max_fetch_size: Option<usize>,
    pub sort: Option<SortSpec>,
    /// Forget the acceptance of an entry whose handling failed
    pub rollback_on_failure: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            delay_when_empty: Duration::from_secs(1),
            max_fetch_size: None,
            sort: None,
            rollback_on_failure: false,
        }
    }
}

pub struct Poller {
    name: String,
    root: String,
    lister: Arc<dyn IEntryLister>,
    chain: FilterChain,
    handler: EntryHandler,
    options: PollerOptions,
}

impl Poller {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<String>,
        lister: Arc<dyn IEntryLister>,
        chain: FilterChain,
        handler: EntryHandler,
        options: PollerOptions,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            lister,
            chain,
            handler,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the mirror directory for remote sources
    pub async fn prepare(&self) -> Result<(), IngestError> {
        if let EntryHandler::Mirror { synchronizer, .. } = &self.handler {
            synchronizer.prepare().await?;
        }
        Ok(())
    }

    /// Runs one cycle, returning the number of entries accepted and emitted
    #[instrument(skip(self, tx), fields(source = %self.name))]
    pub async fn poll_once(&self, tx: &Sender<Message>) -> Result<usize, IngestError> {
        let mut entries = self
            .lister
            .list(&self.root)
            .await
            .map_err(IngestError::Listing)?;
        if let Some(sort) = self.options.sort {
            sort_entries(&mut entries, sort);
        }

        let mut accepted = 0usize;
        for entry in &entries {
            if self.options.max_fetch_size.is_some_and(|max| accepted >= max) {
                debug!(max = accepted, "Max fetch size reached");
                break;
            }
            if !self.chain.accept(entry).await? {
                continue;
            }

            if let Err(e) = self.handle(entry, tx).await {
                if self.options.rollback_on_failure && !matches!(e, IngestError::Closed) {
                    if let Err(rollback) = self.chain.rollback(entry).await {
                        warn!(path = entry.path(), error = %rollback, "Rollback failed");
                    }
                }
                return Err(e);
            }
            accepted += 1;
        }

        debug!(listed = entries.len(), accepted, "Poll cycle complete");
        Ok(accepted)
    }

    /// Polls until `cancel` fires or the message channel closes
    pub async fn run(&self, tx: Sender<Message>, cancel: CancellationToken) -> Result<(), IngestError> {
        self.prepare().await?;
        info!(source = %self.name, root = %self.root, protocol = self.lister.protocol(), "Poller started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.poll_once(&tx).await {
                Ok(0) => true,
                Ok(_) => false,
                Err(IngestError::Closed) => {
                    info!(source = %self.name, "Message channel closed, stopping");
                    return Err(IngestError::Closed);
                }
                Err(e) => {
                    error!(source = %self.name, error = %e, "Poll cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.options.delay_when_empty) => {}
                }
            }
        }

        info!(source = %self.name, "Poller stopped");
        Ok(())
    }

    async fn handle(&self, entry: &SourceEntry, tx: &Sender<Message>) -> Result<(), IngestError> {
        match &self.handler {
            EntryHandler::Local { directory, reader } => {
                let path = directory.join(entry.path());
                let base = self.headers(entry, &path.display().to_string(), false);
                reader.emit(&path, &base, tx).await?;
            }
            EntryHandler::Mirror {
                synchronizer,
                reader,
            } => {
                let mirror = synchronizer.synchronize(entry).await?;
                let base = self.headers(entry, &join_remote(&self.root, entry.path()), true);
                reader.emit(&mirror.final_path, &base, tx).await?;
            }
            EntryHandler::ListOnly => {
                let metadata = serde_json::json!({
                    "path": entry.path(),
                    "name": entry.name(),
                    "size": entry.size_bytes(),
                    "modified": entry.modified_at().timestamp_millis(),
                    "directory": self.root,
                });
                let base = self.headers(entry, &join_remote(&self.root, entry.path()), true);
                send(tx, Message::new(Payload::Json(metadata)).with_headers(&base)).await?;
            }
        }
        Ok(())
    }

    fn headers(&self, entry: &SourceEntry, original: &str, remote: bool) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(headers::SOURCE.to_string(), self.name.clone());
        map.insert(headers::FILE_NAME.to_string(), entry.name().to_string());
        map.insert(headers::FILE_RELATIVE_PATH.to_string(), entry.path().to_string());
        map.insert(headers::FILE_ORIGINAL_PATH.to_string(), original.to_string());
        map.insert(headers::FILE_SIZE.to_string(), entry.size_bytes().to_string());
        map.insert(headers::FILE_MODIFIED.to_string(), entry.marker());
        if remote {
            map.insert(headers::REMOTE_DIRECTORY.to_string(), self.root.clone());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;
    use tributary_core::config::{ReadMode, SortAttribute};
    use tributary_core::ports::ICursorStore;
    use tributary_cursor::MemoryCursorStore;

    use super::*;
    use crate::filter::PersistentAcceptOnceFilter;

    /// Lister returning a scripted listing, or an error when `fail` is set
    struct ScriptedLister {
        entries: Mutex<Vec<SourceEntry>>,
        fail: Mutex<bool>,
    }

    impl ScriptedLister {
        fn new(entries: Vec<SourceEntry>) -> Self {
            Self {
                entries: Mutex::new(entries),
                fail: Mutex::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl IEntryLister for ScriptedLister {
        fn protocol(&self) -> &'static str {
            "scripted"
        }

        async fn list(&self, _root: &str) -> anyhow::Result<Vec<SourceEntry>> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("listing unavailable");
            }
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    fn entry(path: &str, millis: i64, size: u64) -> SourceEntry {
        SourceEntry::file(path, Utc.timestamp_millis_opt(millis).unwrap(), size).unwrap()
    }

    fn list_only_poller(
        lister: Arc<ScriptedLister>,
        store: Arc<dyn ICursorStore>,
        options: PollerOptions,
    ) -> Poller {
        let chain = FilterChain::new().with(PersistentAcceptOnceFilter::new(store, "s3Source/"));
        Poller::new("test", "bucket/in", lister, chain, EntryHandler::ListOnly, options)
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn test_second_cycle_emits_nothing() {
        let lister = Arc::new(ScriptedLister::new(vec![entry("a", 1, 1), entry("b", 1, 1)]));
        let store: Arc<dyn ICursorStore> = Arc::new(MemoryCursorStore::new());
        let poller = list_only_poller(lister, store, PollerOptions::default());
        let (tx, mut rx) = mpsc::channel(16);

        assert_eq!(poller.poll_once(&tx).await.unwrap(), 2);
        assert_eq!(poller.poll_once(&tx).await.unwrap(), 0);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].header(headers::REMOTE_DIRECTORY), Some("bucket/in"));
        match &messages[0].payload {
            Payload::Json(v) => assert_eq!(v["path"], "a"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_fetch_size_is_lazy() {
        let lister = Arc::new(ScriptedLister::new(vec![
            entry("a", 1, 1),
            entry("b", 1, 1),
            entry("c", 1, 1),
        ]));
        let store = Arc::new(MemoryCursorStore::new());
        let options = PollerOptions {
            max_fetch_size: Some(2),
            ..PollerOptions::default()
        };
        let poller = list_only_poller(lister, store.clone(), options);
        let (tx, mut rx) = mpsc::channel(16);

        assert_eq!(poller.poll_once(&tx).await.unwrap(), 2);
        // the third entry was never evaluated
        assert_eq!(store.len(), 2);

        assert_eq!(poller.poll_once(&tx).await.unwrap(), 1);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn test_sort_applies_before_filtering() {
        let lister = Arc::new(ScriptedLister::new(vec![
            entry("small", 1, 1),
            entry("big", 1, 100),
            entry("mid", 1, 10),
        ]));
        let store: Arc<dyn ICursorStore> = Arc::new(MemoryCursorStore::new());
        let options = PollerOptions {
            sort: Some(SortSpec {
                by: SortAttribute::Size,
                descending: true,
            }),
            ..PollerOptions::default()
        };
        let poller = list_only_poller(lister, store, options);
        let (tx, mut rx) = mpsc::channel(16);

        poller.poll_once(&tx).await.unwrap();
        let order: Vec<String> = drain(&mut rx)
            .iter()
            .map(|m| m.header(headers::FILE_NAME).unwrap().to_string())
            .collect();
        assert_eq!(order, ["big", "mid", "small"]);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle_without_marking() {
        let lister = Arc::new(ScriptedLister::new(vec![entry("a", 1, 1)]));
        *lister.fail.lock().unwrap() = true;
        let store = Arc::new(MemoryCursorStore::new());
        let poller = list_only_poller(lister.clone(), store.clone(), PollerOptions::default());
        let (tx, _rx) = mpsc::channel(16);

        assert!(matches!(
            poller.poll_once(&tx).await,
            Err(IngestError::Listing(_))
        ));
        assert!(store.is_empty());

        *lister.fail.lock().unwrap() = false;
        assert_eq!(poller.poll_once(&tx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_local_read_failure_rolls_back_when_enabled() {
        let dir = tempfile::TempDir::new().unwrap();
        // listed but never created on disk, so reading fails
        let lister = Arc::new(ScriptedLister::new(vec![entry("ghost.log", 1, 1)]));
        let store = Arc::new(MemoryCursorStore::new());
        let chain = FilterChain::new().with(PersistentAcceptOnceFilter::new(store.clone(), "p-"));
        let handler = EntryHandler::Local {
            directory: dir.path().to_path_buf(),
            reader: ContentReader::new(ReadMode::Contents),
        };
        let options = PollerOptions {
            rollback_on_failure: true,
            ..PollerOptions::default()
        };
        let poller = Poller::new("local", dir.path().to_str().unwrap(), lister, chain, handler, options);
        let (tx, _rx) = mpsc::channel(16);

        assert!(matches!(poller.poll_once(&tx).await, Err(IngestError::Io(_))));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cycle_waits_delay_when_empty() {
        let lister = Arc::new(ScriptedLister::new(Vec::new()));
        let store: Arc<dyn ICursorStore> = Arc::new(MemoryCursorStore::new());
        let options = PollerOptions {
            delay_when_empty: Duration::from_millis(500),
            ..PollerOptions::default()
        };
        let poller = Arc::new(list_only_poller(lister.clone(), store, options));
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(tx, cancel).await })
        };

        // first cycle is empty; a new entry must not be seen before the delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        lister.entries.lock().unwrap().push(entry("late", 1, 1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let message = rx.recv().await.unwrap();
        assert_eq!(message.header(headers::FILE_NAME), Some("late"));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
