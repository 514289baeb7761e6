//! Filter chain
//!
//! A [`FilterChain`] evaluates its filters in order and stops at the first
//! rejection, so a filter with side effects (the accept-once filters) only
//! runs for entries every earlier filter accepted.
//!
//! ## Accept-once semantics
//!
//! [`PersistentAcceptOnceFilter`] records each accepted entry's modification
//! marker in the cursor store under `prefix + key`. An entry is rejected when
//! the stored marker equals its current marker and accepted (and recorded)
//! otherwise. With [`AcceptStrategy::CheckThenAct`] the read and the write
//! are separate calls: two pollers sharing one store can both accept the
//! same version. [`AcceptStrategy::CompareAndSet`] closes that window on
//! backends with atomic operations.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, trace};
use tributary_core::config::AcceptStrategy;
use tributary_core::domain::{CursorKey, DomainError, SourceEntry};
use tributary_core::ports::ICursorStore;

use crate::IngestError;

/// One predicate of a filter chain
#[async_trait::async_trait]
pub trait IEntryFilter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError>;

    /// Forgets a previous acceptance so the entry can be accepted again
    async fn rollback(&self, entry: &SourceEntry) -> Result<(), IngestError> {
        let _ = entry;
        Ok(())
    }
}

// ============================================================================
// Name filter
// ============================================================================

enum NameMatcher {
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

/// Matches the final path segment against a glob or a regex
///
/// Regexes must match the whole name.
pub struct NameFilter {
    matcher: NameMatcher,
}

impl NameFilter {
    pub fn glob(pattern: &str) -> Result<Self, DomainError> {
        let compiled = glob::Pattern::new(pattern).map_err(|e| DomainError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            matcher: NameMatcher::Glob(compiled),
        })
    }

    pub fn regex(pattern: &str) -> Result<Self, DomainError> {
        let compiled =
            regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| DomainError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            matcher: NameMatcher::Regex(compiled),
        })
    }

    /// Builds the filter for an optional pattern/regex pair
    ///
    /// Both set is a configuration error.
    pub fn from_options(
        pattern: Option<&str>,
        regex: Option<&str>,
    ) -> Result<Option<Self>, IngestError> {
        match (pattern, regex) {
            (Some(_), Some(_)) => Err(IngestError::Configuration(
                "filename_pattern and filename_regex are mutually exclusive".to_string(),
            )),
            (Some(p), None) => Ok(Some(Self::glob(p)?)),
            (None, Some(r)) => Ok(Some(Self::regex(r)?)),
            (None, None) => Ok(None),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            NameMatcher::Glob(p) => p.matches(name),
            NameMatcher::Regex(r) => r.is_match(name),
        }
    }
}

#[async_trait::async_trait]
impl IEntryFilter for NameFilter {
    fn name(&self) -> &'static str {
        "name"
    }

    async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError> {
        Ok(self.matches(entry.name()))
    }
}

/// Rejects dot-files
#[derive(Debug, Default)]
pub struct HiddenFileFilter;

#[async_trait::async_trait]
impl IEntryFilter for HiddenFileFilter {
    fn name(&self) -> &'static str {
        "hidden"
    }

    async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError> {
        Ok(!entry.name().starts_with('.'))
    }
}

// ============================================================================
// Accept-once filters
// ============================================================================

/// Accepts each path once for the lifetime of the process, whatever its
/// modification time
#[derive(Debug, Default)]
pub struct AcceptOnceFilter {
    seen: DashSet<String>,
}

impl AcceptOnceFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IEntryFilter for AcceptOnceFilter {
    fn name(&self) -> &'static str {
        "accept-once"
    }

    async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError> {
        Ok(self.seen.insert(entry.path().to_string()))
    }

    async fn rollback(&self, entry: &SourceEntry) -> Result<(), IngestError> {
        self.seen.remove(entry.path());
        Ok(())
    }
}

/// How the entry path is qualified inside a cursor key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScope {
    /// `prefix + path`
    Relative,
    /// `prefix + root + "-" + path`; changing the root resets dedup state
    Root(String),
    /// `prefix + <base>/<path>` with an absolute local base directory
    Absolute(PathBuf),
}

/// Cursor-store backed accept-once filter keyed by path, valued by marker
pub struct PersistentAcceptOnceFilter {
    store: Arc<dyn ICursorStore>,
    prefix: String,
    scope: KeyScope,
    strategy: AcceptStrategy,
}

impl PersistentAcceptOnceFilter {
    pub fn new(store: Arc<dyn ICursorStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            scope: KeyScope::Relative,
            strategy: AcceptStrategy::CheckThenAct,
        }
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Fails when compare-and-set is requested on a store without it
    pub fn with_strategy(mut self, strategy: AcceptStrategy) -> Result<Self, IngestError> {
        if strategy == AcceptStrategy::CompareAndSet && !self.store.supports_compare_and_set() {
            return Err(IngestError::Configuration(format!(
                "accept_strategy compare_and_set is not supported by the {} cursor store",
                self.store.backend_name()
            )));
        }
        self.strategy = strategy;
        Ok(self)
    }

    pub fn key_for(&self, entry: &SourceEntry) -> Result<CursorKey, DomainError> {
        match &self.scope {
            KeyScope::Relative => CursorKey::new(&self.prefix, entry.path()),
            KeyScope::Root(root) => CursorKey::scoped(&self.prefix, root, entry.path()),
            KeyScope::Absolute(base) => {
                CursorKey::new(&self.prefix, &base.join(entry.path()).to_string_lossy())
            }
        }
    }

    async fn check_then_act(&self, key: &str, marker: &str) -> anyhow::Result<bool> {
        let stored = self.store.get(key).await?;
        if stored.as_deref() == Some(marker) {
            return Ok(false);
        }
        self.store.put(key, marker).await?;
        Ok(true)
    }

    async fn compare_and_set(&self, key: &str, marker: &str) -> anyhow::Result<bool> {
        match self.store.put_if_absent(key, marker).await? {
            None => Ok(true),
            Some(existing) if existing == marker => Ok(false),
            Some(existing) => self.store.replace(key, &existing, marker).await,
        }
    }
}

#[async_trait::async_trait]
impl IEntryFilter for PersistentAcceptOnceFilter {
    fn name(&self) -> &'static str {
        "persistent-accept-once"
    }

    async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError> {
        let key = self.key_for(entry)?;
        let marker = entry.marker();

        let accepted = match self.strategy {
            AcceptStrategy::CheckThenAct => self.check_then_act(key.as_str(), &marker).await,
            AcceptStrategy::CompareAndSet => self.compare_and_set(key.as_str(), &marker).await,
        }
        .map_err(IngestError::Store)?;

        if accepted {
            debug!(key = %key, marker = %marker, "Accepted new version");
        } else {
            trace!(key = %key, marker = %marker, "Already processed");
        }
        Ok(accepted)
    }

    async fn rollback(&self, entry: &SourceEntry) -> Result<(), IngestError> {
        let key = self.key_for(entry)?;
        self.store
            .remove(key.as_str())
            .await
            .map_err(IngestError::Store)?;
        debug!(key = %key, "Rolled back acceptance");
        Ok(())
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered filters; the first rejection wins
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn IEntryFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl IEntryFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn push(&mut self, filter: Box<dyn IEntryFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub async fn accept(&self, entry: &SourceEntry) -> Result<bool, IngestError> {
        for filter in &self.filters {
            if !filter.accept(entry).await? {
                trace!(path = entry.path(), filter = filter.name(), "Rejected");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rolls back every filter, in reverse order
    pub async fn rollback(&self, entry: &SourceEntry) -> Result<(), IngestError> {
        for filter in self.filters.iter().rev() {
            filter.rollback(entry).await?;
        }
        Ok(())
    }
}
