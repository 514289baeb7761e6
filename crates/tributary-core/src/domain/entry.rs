//! Listed entries, cursor keys and mirror files
//!
//! A [`SourceEntry`] is produced fresh by a lister on every poll cycle and is
//! never persisted. What survives between cycles is a [`CursorRecord`]: the
//! entry's modification marker stored under a [`CursorKey`].

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// SourceEntry
// ============================================================================

/// One entry returned by a lister
///
/// `path` is relative to the configured root: a file name for flat directory
/// listings, an object key (minus the configured prefix) for S3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    path: String,
    modified_at: DateTime<Utc>,
    size_bytes: u64,
    is_directory: bool,
}

impl SourceEntry {
    /// Creates a regular file entry
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if `path` is empty.
    pub fn file(
        path: impl Into<String>,
        modified_at: DateTime<Utc>,
        size_bytes: u64,
    ) -> Result<Self, DomainError> {
        Self::new(path, modified_at, size_bytes, false)
    }

    /// Creates an entry, file or directory
    pub fn new(
        path: impl Into<String>,
        modified_at: DateTime<Utc>,
        size_bytes: u64,
        is_directory: bool,
    ) -> Result<Self, DomainError> {
        let path = path.into();
        if path.is_empty() {
            return Err(DomainError::InvalidPath(path));
        }
        Ok(Self {
            path,
            modified_at,
            size_bytes,
            is_directory,
        })
    }

    /// Path relative to the listed root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path segment, used by name filters and as the mirror file name
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// The modification marker as stored in a cursor store (epoch millis)
    pub fn marker(&self) -> String {
        self.modified_at.timestamp_millis().to_string()
    }
}

// ============================================================================
// CursorKey
// ============================================================================

/// Key under which an entry's marker is stored
///
/// Format is `<prefix><root-qualifier?><path>`; the prefix partitions the
/// key space so several sources can share one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorKey(String);

impl CursorKey {
    /// `prefix + path`
    pub fn new(prefix: &str, path: &str) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidKey(format!(
                "empty path for prefix '{prefix}'"
            )));
        }
        Ok(Self(format!("{prefix}{path}")))
    }

    /// `prefix + root + "-" + path`, used by listing-only modes.
    ///
    /// Changing the configured root changes every key, which resets dedup
    /// state for that source.
    pub fn scoped(prefix: &str, root: &str, path: &str) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidKey(format!(
                "empty path for prefix '{prefix}' and root '{root}'"
            )));
        }
        Ok(Self(format!("{prefix}{root}-{path}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CursorKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key/value pair as persisted by a cursor store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub key: String,
    pub value: String,
}

// ============================================================================
// LocalMirrorFile
// ============================================================================

/// Paths involved in one transfer into the local mirror directory
///
/// Content is streamed to `temp_path` and only renamed to `final_path` once
/// the transfer completed, so readers never see a partial file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMirrorFile {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
}

impl LocalMirrorFile {
    /// Builds the temp/final pair for `name` inside `local_dir`
    pub fn for_entry(local_dir: &Path, name: &str, temp_suffix: &str) -> Self {
        let final_path = local_dir.join(name);
        let mut temp = final_path.as_os_str().to_owned();
        temp.push(temp_suffix);
        Self {
            temp_path: PathBuf::from(temp),
            final_path,
        }
    }
}
