//! Configuration module for tributary.
//!
//! Typed configuration structs mapping to the YAML configuration file, with
//! loading, defaults and exhaustive validation. Every configuration problem
//! is fatal at startup; [`Config::validate`] reports all of them at once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Cursor key prefix for local directory sources.
pub const DEFAULT_FILE_KEY_PREFIX: &str = "local-file-system-metadata-";
/// Cursor key prefix for SFTP sources.
pub const DEFAULT_SFTP_KEY_PREFIX: &str = "sftpSource/";
/// Cursor key prefix for S3 sources.
pub const DEFAULT_S3_KEY_PREFIX: &str = "s3Source/";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration for tributary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cursor_store: CursorStoreConfig,
    pub sources: Vec<SourceConfig>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit logs as JSON objects instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor store
// ---------------------------------------------------------------------------

/// Which backend persists cursor records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorBackend {
    #[default]
    Memory,
    #[serde(alias = "jdbc")]
    Sqlite,
    Redis,
    Zookeeper,
    Hazelcast,
    Dynamodb,
    Mongodb,
}

impl CursorBackend {
    pub fn name(&self) -> &'static str {
        match self {
            CursorBackend::Memory => "memory",
            CursorBackend::Sqlite => "sqlite",
            CursorBackend::Redis => "redis",
            CursorBackend::Zookeeper => "zookeeper",
            CursorBackend::Hazelcast => "hazelcast",
            CursorBackend::Dynamodb => "dynamodb",
            CursorBackend::Mongodb => "mongodb",
        }
    }

    /// Whether the backend offers atomic put-if-absent / replace.
    pub fn supports_compare_and_set(&self) -> bool {
        !matches!(self, CursorBackend::Hazelcast)
    }
}

/// Cursor store selection plus per-backend connection settings.
///
/// Only the section matching `backend` is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorStoreConfig {
    pub backend: CursorBackend,
    pub sqlite: SqliteStoreConfig,
    pub redis: RedisStoreConfig,
    pub zookeeper: ZookeeperStoreConfig,
    pub hazelcast: HazelcastStoreConfig,
    pub dynamodb: DynamoDbStoreConfig,
    pub mongodb: MongoStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    /// Database file; created with its parent directories if missing.
    pub path: PathBuf,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("tributary")
                .join("cursor.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    pub url: String,
    /// Name of the Redis hash holding all cursor records.
    pub key: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key: "MetaData".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperStoreConfig {
    pub connect_string: String,
    /// Parent znode; one child node per cursor key.
    pub root: String,
    pub session_timeout_ms: u64,
}

impl Default for ZookeeperStoreConfig {
    fn default() -> Self {
        Self {
            connect_string: "127.0.0.1:2181".to_string(),
            root: "/tributary-cursor".to_string(),
            session_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HazelcastStoreConfig {
    /// Base URL of a member with the REST endpoint group enabled.
    pub url: String,
    pub map: String,
}

impl Default for HazelcastStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5701".to_string(),
            map: "metaData".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoDbStoreConfig {
    pub table: String,
    pub region: Option<String>,
    /// Override endpoint, e.g. DynamoDB Local.
    pub endpoint: Option<String>,
    /// Static credentials; the default AWS provider chain is used otherwise.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for DynamoDbStoreConfig {
    fn default() -> Self {
        Self {
            table: "TributaryCursorStore".to_string(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoStoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            database: "tributary".to_string(),
            collection: "metadataStore".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared source options
// ---------------------------------------------------------------------------

/// How an accepted local file becomes message payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// The whole file as one binary payload.
    #[default]
    Contents,
    /// One payload per line.
    Lines,
    /// The local path only.
    Ref,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub mode: ReadMode,
    /// Wrap each file's lines in START/END markers (lines mode only).
    pub with_markers: bool,
    /// Render markers as JSON text rather than structured payloads.
    pub markers_json: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::Contents,
            with_markers: false,
            markers_json: true,
        }
    }
}

/// How the persistent accept-once filter updates the cursor store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptStrategy {
    /// Read, compare, then write. Two pollers sharing a store can both
    /// accept the same version.
    #[default]
    CheckThenAct,
    /// Use the store's atomic put-if-absent / replace.
    CompareAndSet,
}

/// What the local-directory duplicate filter keys on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Persistent: a path is re-accepted when its modification time changes.
    #[default]
    Modified,
    /// In-memory: a path is accepted once per process, whatever its mtime.
    Path,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortAttribute {
    #[default]
    Name,
    Size,
    Modified,
}

/// Ordering applied to a listing before filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortSpec {
    pub by: SortAttribute,
    pub descending: bool,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One configured source; `kind` selects the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    File(FileSourceConfig),
    Tail(TailSourceConfig),
    Sftp(RemoteSourceConfig<SftpConnectionConfig>),
    S3(RemoteSourceConfig<S3ConnectionConfig>),
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::File(c) => &c.name,
            SourceConfig::Tail(c) => &c.name,
            SourceConfig::Sftp(c) => &c.name,
            SourceConfig::S3(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::File(_) => "file",
            SourceConfig::Tail(_) => "tail",
            SourceConfig::Sftp(_) => "sftp",
            SourceConfig::S3(_) => "s3",
        }
    }
}

/// Polls a local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    pub name: String,
    pub directory: PathBuf,
    /// Glob on the file name, e.g. `*.log`. Exclusive with `filename_regex`.
    pub filename_pattern: Option<String>,
    pub filename_regex: Option<String>,
    pub prevent_duplicates: bool,
    pub dedup: DedupMode,
    pub ignore_hidden: bool,
    pub key_prefix: Option<String>,
    pub accept_strategy: AcceptStrategy,
    pub delay_when_empty_ms: u64,
    pub max_fetch_size: Option<usize>,
    pub sort: Option<SortSpec>,
    pub consumer: ConsumerConfig,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            directory: PathBuf::new(),
            filename_pattern: None,
            filename_regex: None,
            prevent_duplicates: true,
            dedup: DedupMode::Modified,
            ignore_hidden: true,
            key_prefix: None,
            accept_strategy: AcceptStrategy::CheckThenAct,
            delay_when_empty_ms: 1000,
            max_fetch_size: None,
            sort: None,
            consumer: ConsumerConfig::default(),
        }
    }
}

impl FileSourceConfig {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or(DEFAULT_FILE_KEY_PREFIX)
    }
}

/// Which tailing implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStrategy {
    /// Spawn the OS `tail` command.
    Native,
    /// Portable polling reader.
    Polling,
}

/// Follows appended lines of a single file.
///
/// Setting `native_options` selects the OS `tail` command; otherwise the
/// polling tailer runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailSourceConfig {
    pub name: String,
    pub file: PathBuf,
    /// Options passed to `tail`, e.g. `-F -n 0`.
    pub native_options: Option<String>,
    /// Capture the native process's stderr as status events.
    pub status_reader: bool,
    /// Wait between attempts while the file (or `tail`) is unavailable.
    pub attempts_delay_ms: u64,
    /// Emit an idle event after this much quiet time; 0 disables.
    pub idle_event_interval_ms: u64,
    pub polling_delay_ms: u64,
    /// Start at end of file rather than the beginning.
    pub end: bool,
    /// Close and reopen the file between reads.
    pub reopen: bool,
}

impl Default for TailSourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            file: PathBuf::new(),
            native_options: None,
            status_reader: false,
            attempts_delay_ms: 5000,
            idle_event_interval_ms: 0,
            polling_delay_ms: 1000,
            end: true,
            reopen: false,
        }
    }
}

impl TailSourceConfig {
    pub fn strategy(&self) -> TailStrategy {
        if self.native_options.is_some() {
            TailStrategy::Native
        } else {
            TailStrategy::Polling
        }
    }
}

/// Polls a remote directory (SFTP) or bucket (S3) and mirrors new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "C: Deserialize<'de> + Default"))]
pub struct RemoteSourceConfig<C> {
    pub name: String,
    /// SFTP directory, or `bucket[/prefix]` for S3.
    pub remote_directory: String,
    pub local_directory: PathBuf,
    pub auto_create_local_directory: bool,
    pub delete_remote_files: bool,
    pub preserve_timestamp: bool,
    pub temporary_file_suffix: String,
    pub max_fetch_size: Option<usize>,
    pub filename_pattern: Option<String>,
    pub filename_regex: Option<String>,
    pub key_prefix: Option<String>,
    pub accept_strategy: AcceptStrategy,
    /// Forget acceptance of entries whose transfer failed in this cycle.
    pub rollback_on_failure: bool,
    /// Emit entry metadata only; nothing is transferred.
    pub list_only: bool,
    pub sort: Option<SortSpec>,
    pub delay_when_empty_ms: u64,
    pub consumer: ConsumerConfig,
    pub connection: C,
}

impl<C: Default> Default for RemoteSourceConfig<C> {
    fn default() -> Self {
        Self {
            name: String::new(),
            remote_directory: String::new(),
            local_directory: PathBuf::new(),
            auto_create_local_directory: true,
            delete_remote_files: false,
            preserve_timestamp: true,
            temporary_file_suffix: ".writing".to_string(),
            max_fetch_size: None,
            filename_pattern: None,
            filename_regex: None,
            key_prefix: None,
            accept_strategy: AcceptStrategy::CheckThenAct,
            rollback_on_failure: false,
            list_only: false,
            sort: None,
            delay_when_empty_ms: 1000,
            consumer: ConsumerConfig::default(),
            connection: C::default(),
        }
    }
}

impl RemoteSourceConfig<SftpConnectionConfig> {
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or(DEFAULT_SFTP_KEY_PREFIX)
    }
}

impl RemoteSourceConfig<S3ConnectionConfig> {
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or(DEFAULT_S3_KEY_PREFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for SftpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            private_key: None,
            passphrase: None,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3ConnectionConfig {
    pub region: Option<String>,
    /// Override endpoint, e.g. MinIO.
    pub endpoint: Option<String>,
    pub path_style: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tributary/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tributary")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sources[0].directory"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Collects errors for one config section under a field prefix.
struct Findings<'a> {
    prefix: String,
    errors: &'a mut Vec<ValidationError>,
}

impl Findings<'_> {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: format!("{}.{}", self.prefix, field),
            message: message.into(),
        });
    }

    fn positive(&mut self, field: &str, value: u64) {
        if value == 0 {
            self.push(field, "must be greater than 0");
        }
    }

    fn name_filter(&mut self, pattern: &Option<String>, regex: &Option<String>) {
        match (pattern, regex) {
            (Some(_), Some(_)) => {
                self.push(
                    "filename_pattern",
                    "filename_pattern and filename_regex are mutually exclusive",
                );
            }
            (Some(p), None) => {
                if let Err(e) = glob::Pattern::new(p) {
                    self.push("filename_pattern", format!("invalid glob '{p}': {e}"));
                }
            }
            (None, Some(r)) => {
                if let Err(e) = regex::Regex::new(r) {
                    self.push("filename_regex", format!("invalid regex '{r}': {e}"));
                }
            }
            (None, None) => {}
        }
    }

    fn fetch_size(&mut self, max_fetch_size: Option<usize>) {
        if max_fetch_size == Some(0) {
            self.push("max_fetch_size", "must be greater than 0 when set");
        }
    }

    fn consumer(&mut self, consumer: &ConsumerConfig) {
        if consumer.with_markers && consumer.mode != ReadMode::Lines {
            self.push("consumer.with_markers", "markers are only emitted in lines mode");
        }
    }

    fn strategy(&mut self, strategy: AcceptStrategy, backend: CursorBackend) {
        if strategy == AcceptStrategy::CompareAndSet && !backend.supports_compare_and_set() {
            self.push(
                "accept_strategy",
                format!(
                    "compare_and_set is not available on the {} cursor store",
                    backend.name()
                ),
            );
        }
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        let backend = self.cursor_store.backend;
        if backend == CursorBackend::Zookeeper && !self.cursor_store.zookeeper.root.starts_with('/')
        {
            errors.push(ValidationError {
                field: "cursor_store.zookeeper.root".into(),
                message: "must be an absolute znode path".into(),
            });
        }

        let mut names = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let mut findings = Findings {
                prefix: format!("sources[{idx}]"),
                errors: &mut errors,
            };

            if source.name().trim().is_empty() {
                findings.push("name", "is required");
            } else if !names.insert(source.name().to_string()) {
                findings.push("name", format!("duplicate source name '{}'", source.name()));
            }

            match source {
                SourceConfig::File(c) => validate_file(c, backend, &mut findings),
                SourceConfig::Tail(c) => validate_tail(c, &mut findings),
                SourceConfig::Sftp(c) => {
                    validate_remote(c, backend, &mut findings);
                    if c.connection.host.trim().is_empty() {
                        findings.push("connection.host", "is required");
                    }
                    if c.connection.username.trim().is_empty() {
                        findings.push("connection.username", "is required");
                    }
                    findings.positive("connection.connect_timeout_ms", c.connection.connect_timeout_ms);
                }
                SourceConfig::S3(c) => {
                    validate_remote(c, backend, &mut findings);
                    if c.connection.access_key.is_some() != c.connection.secret_key.is_some() {
                        findings.push(
                            "connection.access_key",
                            "access_key and secret_key must be set together",
                        );
                    }
                }
            }
        }

        errors
    }
}

fn validate_file(c: &FileSourceConfig, backend: CursorBackend, findings: &mut Findings<'_>) {
    if c.directory.as_os_str().is_empty() {
        findings.push("directory", "is required");
    }
    findings.name_filter(&c.filename_pattern, &c.filename_regex);
    findings.positive("delay_when_empty_ms", c.delay_when_empty_ms);
    findings.fetch_size(c.max_fetch_size);
    findings.consumer(&c.consumer);
    if c.prevent_duplicates && c.dedup == DedupMode::Modified {
        findings.strategy(c.accept_strategy, backend);
    }
}

fn validate_tail(c: &TailSourceConfig, findings: &mut Findings<'_>) {
    if c.file.as_os_str().is_empty() {
        findings.push("file", "is required");
    }
    findings.positive("attempts_delay_ms", c.attempts_delay_ms);
    match c.strategy() {
        TailStrategy::Native => {
            if c.native_options.as_deref().is_some_and(|o| o.trim().is_empty()) {
                findings.push(
                    "native_options",
                    "must not be blank; omit it to use the polling tailer",
                );
            }
            if c.reopen {
                findings.push("reopen", "only applies to the polling tailer");
            }
        }
        TailStrategy::Polling => {
            if c.status_reader {
                findings.push("status_reader", "requires native_options (native tail)");
            }
            findings.positive("polling_delay_ms", c.polling_delay_ms);
        }
    }
}

fn validate_remote<C>(c: &RemoteSourceConfig<C>, backend: CursorBackend, findings: &mut Findings<'_>) {
    if c.remote_directory.trim().is_empty() {
        findings.push("remote_directory", "is required");
    }
    if !c.list_only {
        if c.local_directory.as_os_str().is_empty() {
            findings.push("local_directory", "is required unless list_only is set");
        }
        if c.temporary_file_suffix.is_empty() {
            findings.push("temporary_file_suffix", "must not be empty");
        }
    }
    findings.name_filter(&c.filename_pattern, &c.filename_regex);
    findings.positive("delay_when_empty_ms", c.delay_when_empty_ms);
    findings.fetch_size(c.max_fetch_size);
    findings.consumer(&c.consumer);
    findings.strategy(c.accept_strategy, backend);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
logging:
  level: debug
cursor_store:
  backend: jdbc
  sqlite:
    path: /var/lib/tributary/cursor.db
sources:
  - kind: file
    name: logs
    directory: /var/log/app
    filename_pattern: "*.log"
    delay_when_empty_ms: 100
    consumer:
      mode: lines
      with_markers: true
  - kind: tail
    name: follow
    file: /var/log/app/current.log
    end: false
  - kind: sftp
    name: partner
    remote_directory: /outbound
    local_directory: /srv/mirror/partner
    delete_remote_files: true
    connection:
      host: sftp.example.com
      username: feed
      password: secret
  - kind: s3
    name: archive
    remote_directory: my-bucket/incoming
    list_only: true
    sort:
      by: modified
      descending: true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml(FULL_YAML).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.cursor_store.backend, CursorBackend::Sqlite);
        assert_eq!(config.sources.len(), 4);

        match &config.sources[0] {
            SourceConfig::File(c) => {
                assert_eq!(c.filename_pattern.as_deref(), Some("*.log"));
                assert!(c.prevent_duplicates);
                assert_eq!(c.consumer.mode, ReadMode::Lines);
                assert!(c.consumer.markers_json);
                assert_eq!(c.key_prefix(), DEFAULT_FILE_KEY_PREFIX);
            }
            other => panic!("unexpected source {other:?}"),
        }

        match &config.sources[1] {
            SourceConfig::Tail(c) => {
                assert_eq!(c.strategy(), TailStrategy::Polling);
                assert!(!c.end);
                assert_eq!(c.attempts_delay_ms, 5000);
            }
            other => panic!("unexpected source {other:?}"),
        }

        match &config.sources[2] {
            SourceConfig::Sftp(c) => {
                assert_eq!(c.connection.port, 22);
                assert_eq!(c.temporary_file_suffix, ".writing");
                assert!(c.preserve_timestamp);
                assert!(c.delete_remote_files);
            }
            other => panic!("unexpected source {other:?}"),
        }

        match &config.sources[3] {
            SourceConfig::S3(c) => {
                let sort = c.sort.unwrap();
                assert_eq!(sort.by, SortAttribute::Modified);
                assert!(sort.descending);
            }
            other => panic!("unexpected source {other:?}"),
        }

        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_unknown_read_mode_is_rejected_at_parse_time() {
        let yaml = r#"
sources:
  - kind: file
    name: x
    directory: /tmp
    consumer:
      mode: stream
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn test_pattern_and_regex_are_exclusive() {
        let mut source = FileSourceConfig::new("a", "/tmp");
        source.filename_pattern = Some("*.txt".into());
        source.filename_regex = Some(".*".into());
        let config = Config {
            sources: vec![SourceConfig::File(source)],
            ..Config::default()
        };

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources[0].filename_pattern");
    }

    #[test]
    fn test_missing_root_and_bad_regex() {
        let mut source = FileSourceConfig::new("a", "");
        source.filename_regex = Some("(".into());
        let config = Config {
            sources: vec![SourceConfig::File(source)],
            ..Config::default()
        };

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"sources[0].directory".to_string()));
        assert!(fields.contains(&"sources[0].filename_regex".to_string()));
    }

    #[test]
    fn test_duplicate_source_names() {
        let config = Config {
            sources: vec![
                SourceConfig::File(FileSourceConfig::new("same", "/a")),
                SourceConfig::File(FileSourceConfig::new("same", "/b")),
            ],
            ..Config::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources[1].name");
    }

    #[test]
    fn test_compare_and_set_requires_capable_backend() {
        let mut source = FileSourceConfig::new("a", "/tmp");
        source.accept_strategy = AcceptStrategy::CompareAndSet;
        let mut config = Config {
            sources: vec![SourceConfig::File(source)],
            ..Config::default()
        };
        assert!(config.validate().is_empty());

        config.cursor_store.backend = CursorBackend::Hazelcast;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources[0].accept_strategy");
    }

    #[test]
    fn test_tail_option_mismatch() {
        let config = Config {
            sources: vec![SourceConfig::Tail(TailSourceConfig {
                name: "t".into(),
                file: "/tmp/x.log".into(),
                status_reader: true,
                ..TailSourceConfig::default()
            })],
            ..Config::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources[0].status_reader");
    }

    #[test]
    fn test_blank_native_options_rejected() {
        let config = Config {
            sources: vec![SourceConfig::Tail(TailSourceConfig {
                name: "t".into(),
                file: "/tmp/x.log".into(),
                native_options: Some("  ".into()),
                ..TailSourceConfig::default()
            })],
            ..Config::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources[0].native_options");
    }

    #[test]
    fn test_markers_outside_lines_mode() {
        let mut source = FileSourceConfig::new("a", "/tmp");
        source.consumer.with_markers = true;
        let config = Config {
            sources: vec![SourceConfig::File(source)],
            ..Config::default()
        };
        assert_eq!(config.validate()[0].field, "sources[0].consumer.with_markers");
    }

    #[test]
    fn test_remote_requires_local_directory_unless_list_only() {
        let mut remote: RemoteSourceConfig<S3ConnectionConfig> = RemoteSourceConfig {
            name: "s3".into(),
            remote_directory: "bucket".into(),
            ..RemoteSourceConfig::default()
        };
        let config = Config {
            sources: vec![SourceConfig::S3(remote.clone())],
            ..Config::default()
        };
        assert_eq!(config.validate()[0].field, "sources[0].local_directory");

        remote.list_only = true;
        let config = Config {
            sources: vec![SourceConfig::S3(remote)],
            ..Config::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL_YAML).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sources[1].kind(), "tail");
        assert_eq!(config.sources[2].name(), "partner");
    }
}
