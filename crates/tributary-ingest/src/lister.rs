//! Local directory listing
//!
//! Lists regular files directly below a directory. Subdirectories and
//! symbolic links are skipped; the file type is taken without following
//! links.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use tributary_core::config::{SortAttribute, SortSpec};
use tributary_core::domain::SourceEntry;
use tributary_core::ports::IEntryLister;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirectoryLister;

impl LocalDirectoryLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl IEntryLister for LocalDirectoryLister {
    fn protocol(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self))]
    async fn list(&self, root: &str) -> anyhow::Result<Vec<SourceEntry>> {
        let mut dir = tokio::fs::read_dir(Path::new(root)).await?;
        let mut entries = Vec::new();

        while let Some(item) = dir.next_entry().await? {
            let file_type = item.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                debug!(path = %item.path().display(), "Skipping non UTF-8 file name");
                continue;
            };

            // the file may vanish between readdir and stat
            let metadata = match item.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified: DateTime<Utc> = metadata.modified()?.into();
            entries.push(SourceEntry::file(name, modified, metadata.len())?);
        }

        Ok(entries)
    }
}

/// Sorts `entries` in place; equal keys keep listing order
pub fn sort_entries(entries: &mut [SourceEntry], spec: SortSpec) {
    entries.sort_by(|a, b| {
        let ordering = match spec.by {
            SortAttribute::Name => a.path().cmp(b.path()),
            SortAttribute::Size => a.size_bytes().cmp(&b.size_bytes()),
            SortAttribute::Modified => a.modified_at().cmp(&b.modified_at()),
        };
        if spec.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}
