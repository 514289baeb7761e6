//! Remote-to-local mirroring
//!
//! Remote bytes are streamed to `<name><temp suffix>` in the mirror
//! directory and renamed to `<name>` once complete. The rename is atomic on
//! one filesystem, so the final name only ever refers to a complete file.
//! A failed transfer removes the partial temp file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use tributary_core::domain::{LocalMirrorFile, SourceEntry};
use tributary_core::ports::IRemoteTransfer;

use crate::IngestError;

#[derive(Debug, Clone)]
pub struct SynchronizerOptions {
    /// Remote directory (SFTP) or `bucket[/prefix]` (S3)
    pub remote_root: String,
    pub local_directory: PathBuf,
    pub auto_create_local_directory: bool,
    pub temporary_file_suffix: String,
    pub preserve_timestamp: bool,
    pub delete_remote_files: bool,
}

pub struct Synchronizer {
    transfer: Arc<dyn IRemoteTransfer>,
    options: SynchronizerOptions,
}

impl Synchronizer {
    pub fn new(transfer: Arc<dyn IRemoteTransfer>, options: SynchronizerOptions) -> Self {
        Self { transfer, options }
    }

    /// Creates or checks the mirror directory
    pub async fn prepare(&self) -> Result<(), IngestError> {
        let dir = &self.options.local_directory;
        if self.options.auto_create_local_directory {
            tokio::fs::create_dir_all(dir).await?;
        } else if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(IngestError::Configuration(format!(
                "local directory {} does not exist and auto_create_local_directory is off",
                dir.display()
            )));
        }
        Ok(())
    }

    /// Mirrors `entry` into the local directory
    ///
    /// Call only after the filter chain accepted the entry. A failure here
    /// leaves the cursor marked, so the version is not retried unless the
    /// caller rolls the acceptance back.
    #[instrument(skip(self, entry), fields(path = entry.path()))]
    pub async fn synchronize(&self, entry: &SourceEntry) -> Result<LocalMirrorFile, IngestError> {
        let mirror = LocalMirrorFile::for_entry(
            &self.options.local_directory,
            entry.name(),
            &self.options.temporary_file_suffix,
        );

        let bytes = match self
            .transfer
            .download(&self.options.remote_root, entry, &mirror.temp_path)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&mirror.temp_path).await;
                return Err(IngestError::Transfer(e));
            }
        };

        if let Err(e) = tokio::fs::rename(&mirror.temp_path, &mirror.final_path).await {
            discard(&mirror.temp_path).await;
            return Err(e.into());
        }

        if self.options.preserve_timestamp {
            set_modified(&mirror.final_path, entry.modified_at()).await?;
        }

        if self.options.delete_remote_files {
            // the local copy is complete; a failed delete must not hide it
            if let Err(e) = self
                .transfer
                .delete(&self.options.remote_root, entry)
                .await
            {
                warn!(path = entry.path(), error = %e, "Failed to delete remote original");
            }
        }

        debug!(
            bytes,
            local = %mirror.final_path.display(),
            "Synchronized entry"
        );
        Ok(mirror)
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

async fn set_modified(path: &Path, modified: DateTime<Utc>) -> Result<(), IngestError> {
    let path = path.to_path_buf();
    let time = SystemTime::from(modified);
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(time)
    })
    .await
    .map_err(|e| IngestError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tributary_core::ports::IEntryLister;

    use super::*;

    struct OneFileRemote {
        content: &'static [u8],
    }

    #[async_trait::async_trait]
    impl IEntryLister for OneFileRemote {
        fn protocol(&self) -> &'static str {
            "fake"
        }

        async fn list(&self, _root: &str) -> anyhow::Result<Vec<SourceEntry>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl IRemoteTransfer for OneFileRemote {
        async fn download(&self, _root: &str, _entry: &SourceEntry, dest: &Path) -> anyhow::Result<u64> {
            tokio::fs::write(dest, self.content).await?;
            Ok(self.content.len() as u64)
        }

        async fn delete(&self, _root: &str, _entry: &SourceEntry) -> anyhow::Result<()> {
            anyhow::bail!("read-only remote")
        }
    }

    fn options(dir: &Path) -> SynchronizerOptions {
        SynchronizerOptions {
            remote_root: "/remote".into(),
            local_directory: dir.join("mirror"),
            auto_create_local_directory: true,
            temporary_file_suffix: ".writing".into(),
            preserve_timestamp: true,
            delete_remote_files: false,
        }
    }

    #[tokio::test]
    async fn test_preserves_remote_timestamp() {
        let dir = TempDir::new().unwrap();
        let sync = Synchronizer::new(Arc::new(OneFileRemote { content: b"abc" }), options(dir.path()));
        sync.prepare().await.unwrap();

        let modified = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let entry = SourceEntry::file("a.txt", modified, 3).unwrap();
        let mirror = sync.synchronize(&entry).await.unwrap();

        assert_eq!(std::fs::read(&mirror.final_path).unwrap(), b"abc");
        assert!(!mirror.temp_path.exists());
        let local: DateTime<Utc> = std::fs::metadata(&mirror.final_path)
            .unwrap()
            .modified()
            .unwrap()
            .into();
        assert_eq!(local.timestamp(), 1_600_000_000);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_local_copy() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.delete_remote_files = true;
        let sync = Synchronizer::new(Arc::new(OneFileRemote { content: b"x" }), opts);
        sync.prepare().await.unwrap();

        let entry = SourceEntry::file("a.txt", Utc::now(), 1).unwrap();
        let mirror = sync.synchronize(&entry).await.unwrap();
        assert!(mirror.final_path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_without_auto_create() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.auto_create_local_directory = false;
        let sync = Synchronizer::new(Arc::new(OneFileRemote { content: b"" }), opts);

        assert!(matches!(
            sync.prepare().await,
            Err(IngestError::Configuration(_))
        ));
    }
}
