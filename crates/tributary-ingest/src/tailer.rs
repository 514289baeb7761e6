//! File tailing
//!
//! Two strategies follow lines appended to one file:
//!
//! - [`NativeTailer`] runs the OS `tail` command (default options
//!   `-F -n 0`) and reads its stdout; its stderr can be captured as
//!   [`TailEvent::Status`] events.
//! - [`PollingTailer`] checks the file for growth every polling delay,
//!   starting at the end or the beginning, optionally reopening the file
//!   between reads. A shrinking or replaced file is read again from offset 0.
//!
//! Both wait `attempts_delay` and try again while the file (or `tail`) is
//! unavailable. A running tailer is owned through a [`TailHandle`]; stopping
//! it cancels the task, waits a bounded grace period for the file handle or
//! subprocess to be released, then aborts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::process::Command;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tributary_core::config::{TailSourceConfig, TailStrategy};
use tributary_core::domain::{headers, Message, Payload};

use crate::reader::decode_line;
use crate::IngestError;

/// Default options for the native `tail` command
pub const DEFAULT_NATIVE_OPTIONS: &str = "-F -n 0";

/// Time allowed for a `tail` subprocess to exit after being killed
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Time allowed for a tailer task to finish after cancellation
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// One complete line, without its terminator
    Line(String),
    /// Nothing was appended for `quiet_for`
    Idle { quiet_for: Duration },
    /// Diagnostic from the tailer or the native process
    Status(String),
    /// The file does not exist yet; the tailer keeps waiting
    TargetMissing(PathBuf),
}

/// Owns a running tailer task
pub struct TailHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TailHandle {
    fn spawn<F>(body: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(body(cancel.clone()));
        Self { cancel, task }
    }

    /// Cancels the tailer and waits up to `grace` for it to release the file
    ///
    /// Returns `false` when the task had to be aborted.
    pub async fn stop(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Tailer did not stop in time, aborting");
                self.task.abort();
                false
            }
        }
    }
}

/// Sleeps for `delay`; `false` if cancelled first
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn idle_interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ============================================================================
// Native tailer
// ============================================================================

#[derive(Debug, Clone)]
pub struct NativeTailer {
    path: PathBuf,
    options: String,
    status_reader: bool,
    attempts_delay: Duration,
    idle_interval: Option<Duration>,
}

enum ChildExit {
    Cancelled,
    Closed,
    Ended,
}

impl NativeTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: DEFAULT_NATIVE_OPTIONS.to_string(),
            status_reader: false,
            attempts_delay: Duration::from_secs(5),
            idle_interval: None,
        }
    }

    pub fn from_config(config: &TailSourceConfig) -> Self {
        Self {
            path: config.file.clone(),
            options: config
                .native_options
                .as_deref()
                .filter(|o| !o.trim().is_empty())
                .unwrap_or(DEFAULT_NATIVE_OPTIONS)
                .to_string(),
            status_reader: config.status_reader,
            attempts_delay: Duration::from_millis(config.attempts_delay_ms),
            idle_interval: idle_interval(config.idle_event_interval_ms),
        }
    }

    pub fn spawn(self, tx: Sender<TailEvent>) -> TailHandle {
        TailHandle::spawn(move |cancel| async move { self.run(tx, cancel).await })
    }

    fn command(&self) -> Command {
        let mut command = Command::new("tail");
        command
            .args(self.options.split_whitespace())
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if self.status_reader {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        command
    }

    async fn run(self, tx: Sender<TailEvent>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let mut child = match self.command().spawn() {
                Ok(child) => child,
                Err(e) => {
                    let status = format!("failed to start tail: {e}");
                    if tx.send(TailEvent::Status(status)).await.is_err()
                        || !pause(self.attempts_delay, &cancel).await
                    {
                        break;
                    }
                    continue;
                }
            };
            debug!(pid = ?child.id(), path = %self.path.display(), "Native tail started");

            let stderr_task = child.stderr.take().map(|stderr| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if tx.send(TailEvent::Status(line)).await.is_err() {
                            break;
                        }
                    }
                })
            });

            let exit = match child.stdout.take() {
                Some(stdout) => self.pump(stdout, &tx, &cancel).await,
                None => ChildExit::Ended,
            };

            // release the subprocess before anything else touches the file
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "tail already exited");
            }
            match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Native tail exited"),
                Ok(Err(e)) => warn!(error = %e, "Failed to reap tail"),
                Err(_) => warn!("tail did not exit within grace period"),
            }
            if let Some(task) = stderr_task {
                task.abort();
            }

            match exit {
                ChildExit::Cancelled | ChildExit::Closed => break,
                ChildExit::Ended => {
                    let status = "tail process ended, restarting".to_string();
                    if tx.send(TailEvent::Status(status)).await.is_err()
                        || !pause(self.attempts_delay, &cancel).await
                    {
                        break;
                    }
                }
            }
        }
    }

    async fn pump(
        &self,
        stdout: tokio::process::ChildStdout,
        tx: &Sender<TailEvent>,
        cancel: &CancellationToken,
    ) -> ChildExit {
        let mut output = BufReader::new(stdout);
        // read_until keeps partial bytes here across cancelled polls
        let mut raw = Vec::new();
        let mut quiet_since = Instant::now();
        let mut idle_mark = quiet_since;

        loop {
            let deadline = self.idle_interval.map(|interval| idle_mark + interval);
            let idle = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return ChildExit::Cancelled,
                read = output.read_until(b'\n', &mut raw) => match read {
                    Ok(0) => return ChildExit::Ended,
                    Ok(_) => {
                        quiet_since = Instant::now();
                        idle_mark = quiet_since;
                        let line = decode_line(std::mem::take(&mut raw));
                        if tx.send(TailEvent::Line(line)).await.is_err() {
                            return ChildExit::Closed;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read tail output");
                        return ChildExit::Ended;
                    }
                },
                _ = idle => {
                    idle_mark = Instant::now();
                    let event = TailEvent::Idle { quiet_for: idle_mark - quiet_since };
                    if tx.send(event).await.is_err() {
                        return ChildExit::Closed;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Polling tailer
// ============================================================================

#[derive(Debug, Clone)]
pub struct PollingTailer {
    path: PathBuf,
    polling_delay: Duration,
    attempts_delay: Duration,
    idle_interval: Option<Duration>,
    start_at_end: bool,
    reopen: bool,
}

/// Why a polling step could not read
enum Unavailable {
    Missing,
    Failed(String),
}

struct PollingState {
    file: Option<File>,
    position: u64,
    #[cfg(unix)]
    inode: Option<u64>,
    /// Bytes after the last newline
    pending: Vec<u8>,
    /// Set until the first successful open
    first_open: bool,
    /// The file disappeared; read the next one from the start
    lost: bool,
    missing_reported: bool,
    quiet_since: Instant,
    idle_mark: Instant,
}

impl PollingTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            polling_delay: Duration::from_secs(1),
            attempts_delay: Duration::from_secs(5),
            idle_interval: None,
            start_at_end: true,
            reopen: false,
        }
    }

    pub fn from_config(config: &TailSourceConfig) -> Self {
        Self {
            path: config.file.clone(),
            polling_delay: Duration::from_millis(config.polling_delay_ms),
            attempts_delay: Duration::from_millis(config.attempts_delay_ms),
            idle_interval: idle_interval(config.idle_event_interval_ms),
            start_at_end: config.end,
            reopen: config.reopen,
        }
    }

    pub fn with_polling_delay(mut self, delay: Duration) -> Self {
        self.polling_delay = delay;
        self
    }

    pub fn with_attempts_delay(mut self, delay: Duration) -> Self {
        self.attempts_delay = delay;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = Some(interval);
        self
    }

    pub fn start_at_end(mut self, end: bool) -> Self {
        self.start_at_end = end;
        self
    }

    pub fn reopen(mut self, reopen: bool) -> Self {
        self.reopen = reopen;
        self
    }

    pub fn spawn(self, tx: Sender<TailEvent>) -> TailHandle {
        TailHandle::spawn(move |cancel| async move { self.run(tx, cancel).await })
    }

    async fn run(self, tx: Sender<TailEvent>, cancel: CancellationToken) {
        let now = Instant::now();
        let mut state = PollingState {
            file: None,
            position: 0,
            #[cfg(unix)]
            inode: None,
            pending: Vec::new(),
            first_open: true,
            lost: false,
            missing_reported: false,
            quiet_since: now,
            idle_mark: now,
        };

        while !cancel.is_cancelled() {
            let delay = match self.step(&mut state, &tx).await {
                Ok(()) => self.polling_delay,
                Err(Some(Unavailable::Missing)) => {
                    state.file = None;
                    state.lost = true;
                    if !state.missing_reported {
                        state.missing_reported = true;
                        if tx.send(TailEvent::TargetMissing(self.path.clone())).await.is_err() {
                            break;
                        }
                    }
                    self.attempts_delay
                }
                Err(Some(Unavailable::Failed(reason))) => {
                    state.file = None;
                    if tx.send(TailEvent::Status(reason)).await.is_err() {
                        break;
                    }
                    self.attempts_delay
                }
                // receiver gone
                Err(None) => break,
            };

            if self.reopen {
                state.file = None;
            }
            if !pause(delay, &cancel).await {
                break;
            }
        }
        // dropping `state` closes the file
    }

    /// Reads whatever was appended since the last step
    ///
    /// `Err(None)` means the event receiver is gone.
    async fn step(
        &self,
        state: &mut PollingState,
        tx: &Sender<TailEvent>,
    ) -> Result<(), Option<Unavailable>> {
        let on_disk = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Some(Unavailable::Missing))
            }
            Err(e) => return Err(Some(Unavailable::Failed(format!("cannot stat file: {e}")))),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if state.inode.is_some_and(|ino| ino != on_disk.ino()) {
                debug!(path = %self.path.display(), "File replaced, reading from start");
                state.file = None;
                state.lost = true;
            }
            state.inode = Some(on_disk.ino());
        }

        if state.file.is_none() {
            let file = File::open(&self.path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Some(Unavailable::Missing)
                } else {
                    Some(Unavailable::Failed(format!("cannot open file: {e}")))
                }
            })?;
            if state.first_open {
                state.position = if self.start_at_end { on_disk.len() } else { 0 };
                state.first_open = false;
            } else if state.lost {
                state.position = 0;
                state.pending.clear();
            }
            state.lost = false;
            state.missing_reported = false;
            state.file = Some(file);
        }

        let len = on_disk.len();
        if len < state.position {
            debug!(path = %self.path.display(), "File truncated, reading from start");
            state.position = 0;
            state.pending.clear();
        }

        let mut appended = Vec::new();
        if len > state.position {
            if let Some(file) = state.file.as_mut() {
                file.seek(SeekFrom::Start(state.position))
                    .await
                    .map_err(|e| Some(Unavailable::Failed(format!("seek failed: {e}"))))?;
                let read = file
                    .read_to_end(&mut appended)
                    .await
                    .map_err(|e| Some(Unavailable::Failed(format!("read failed: {e}"))))?;
                state.position += read as u64;
            }
        }

        let now = Instant::now();
        if appended.is_empty() {
            if let Some(interval) = self.idle_interval {
                if now.duration_since(state.idle_mark) >= interval {
                    state.idle_mark = now;
                    let event = TailEvent::Idle {
                        quiet_for: now.duration_since(state.quiet_since),
                    };
                    tx.send(event).await.map_err(|_| None)?;
                }
            }
            return Ok(());
        }

        state.quiet_since = now;
        state.idle_mark = now;
        state.pending.extend_from_slice(&appended);
        for line in drain_lines(&mut state.pending) {
            tx.send(TailEvent::Line(line)).await.map_err(|_| None)?;
        }
        Ok(())
    }
}

/// Removes and returns every complete line in `buffer`
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(idx) = buffer.iter().position(|b| *b == b'\n') {
        lines.push(decode_line(buffer.drain(..=idx).collect()));
    }
    lines
}

// ============================================================================
// Tail source
// ============================================================================

/// A configured tail turned into outbound messages
///
/// Lines become text messages; idle, status and missing-target events are
/// logged.
pub struct TailSource {
    name: String,
    config: TailSourceConfig,
}

impl TailSource {
    pub fn new(config: TailSourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn spawn_tailer(&self, tx: Sender<TailEvent>) -> TailHandle {
        match self.config.strategy() {
            TailStrategy::Native => NativeTailer::from_config(&self.config).spawn(tx),
            TailStrategy::Polling => PollingTailer::from_config(&self.config).spawn(tx),
        }
    }

    fn message(&self, line: String) -> Message {
        let path: &Path = &self.config.file;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Message::new(Payload::Text(line))
            .with_header(headers::SOURCE, self.name.clone())
            .with_header(headers::FILE_NAME, file_name)
            .with_header(headers::FILE_ORIGINAL_PATH, path.display().to_string())
    }

    pub async fn run(self, tx: Sender<Message>, cancel: CancellationToken) -> Result<(), IngestError> {
        let (event_tx, mut events) = mpsc::channel(256);
        let handle = self.spawn_tailer(event_tx);
        info!(
            source = %self.name,
            file = %self.config.file.display(),
            strategy = ?self.config.strategy(),
            "Tailer started"
        );

        let mut result = Ok(());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(TailEvent::Line(line)) => {
                        if tx.send(self.message(line)).await.is_err() {
                            result = Err(IngestError::Closed);
                            break;
                        }
                    }
                    Some(TailEvent::Idle { quiet_for }) => {
                        info!(source = %self.name, quiet_ms = quiet_for.as_millis() as u64, "Tail idle");
                    }
                    Some(TailEvent::Status(status)) => {
                        warn!(source = %self.name, status = %status, "Tail status");
                    }
                    Some(TailEvent::TargetMissing(path)) => {
                        debug!(source = %self.name, path = %path.display(), "Tail target missing, waiting");
                    }
                    None => break,
                },
            }
        }

        // unblock a tailer waiting on a full channel
        drop(events);
        if !handle.stop(STOP_GRACE).await {
            warn!(source = %self.name, "Tailer aborted");
        }
        info!(source = %self.name, "Tailer stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn next_line(rx: &mut mpsc::Receiver<TailEvent>) -> String {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for tail event")
                .expect("tailer stopped");
            if let TailEvent::Line(line) = event {
                return line;
            }
        }
    }

    #[test]
    fn test_drain_lines_keeps_partial_tail() {
        let mut buffer = b"one\r\ntwo\nthr".to_vec();
        assert_eq!(drain_lines(&mut buffer), ["one", "two"]);
        assert_eq!(buffer, b"thr");
    }

    #[test]
    fn test_blank_native_options_fall_back_to_follow() {
        let config = TailSourceConfig {
            file: "/tmp/x.log".into(),
            native_options: Some(String::new()),
            ..TailSourceConfig::default()
        };
        assert_eq!(NativeTailer::from_config(&config).options, DEFAULT_NATIVE_OPTIONS);

        let config = TailSourceConfig {
            native_options: Some("-f -n 5".into()),
            ..config
        };
        assert_eq!(NativeTailer::from_config(&config).options, "-f -n 5");
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .with_polling_delay(Duration::from_millis(20))
            .spawn(tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, "new\n");
        assert_eq!(next_line(&mut rx).await, "new");

        assert!(handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .start_at_end(false)
            .with_polling_delay(Duration::from_millis(20))
            .spawn(tx);

        append(&path, "hel");
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, "lo\n");
        assert_eq!(next_line(&mut rx).await, "hello");

        handle.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_missing_file_is_waited_for() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.log");

        let (tx, mut rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .start_at_end(false)
            .with_polling_delay(Duration::from_millis(20))
            .with_attempts_delay(Duration::from_millis(50))
            .spawn(tx);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, TailEvent::TargetMissing(path.clone()));

        std::fs::write(&path, "created\n").unwrap();
        assert_eq!(next_line(&mut rx).await, "created");

        handle.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .start_at_end(false)
            .with_polling_delay(Duration::from_millis(20))
            .spawn(tx);

        append(&path, "a fairly long first line\n");
        assert_eq!(next_line(&mut rx).await, "a fairly long first line");

        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(next_line(&mut rx).await, "short");

        handle.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_idle_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quiet.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .with_polling_delay(Duration::from_millis(10))
            .with_idle_interval(Duration::from_millis(50))
            .spawn(tx);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TailEvent::Idle { quiet_for } if quiet_for >= Duration::from_millis(50)));

        handle.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_releases_file_for_deletion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let handle = PollingTailer::new(&path)
            .with_polling_delay(Duration::from_millis(10))
            .spawn(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.stop(Duration::from_secs(1)).await);
        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_native_tail_follows_appends() {
        if std::process::Command::new("tail").arg("--version").output().is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("native.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = NativeTailer::new(&path).spawn(tx);
        tokio::time::sleep(Duration::from_millis(300)).await;

        append(&path, "native line\n");
        assert_eq!(next_line(&mut rx).await, "native line");

        assert!(handle.stop(Duration::from_secs(3)).await);
    }
}
