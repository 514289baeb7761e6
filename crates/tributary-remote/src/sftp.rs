//! SFTP lister and transfer over libssh2
//!
//! libssh2 is blocking, so each operation runs on the blocking pool against
//! one shared session. A failed operation drops the session; the next call
//! reconnects.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use ssh2::{Session, Sftp};
use tracing::{debug, instrument, warn};
use tributary_core::config::SftpConnectionConfig;
use tributary_core::domain::SourceEntry;
use tributary_core::ports::{IEntryLister, IRemoteTransfer};

use crate::{join_remote, RemoteError};

struct Connection {
    // keeps the transport alive for `sftp`
    _session: Session,
    sftp: Sftp,
}

pub struct SftpRemote {
    config: SftpConnectionConfig,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SftpRemote {
    /// Creates the adapter; the session is opened on first use
    pub fn new(config: SftpConnectionConfig) -> Self {
        Self {
            config,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs `op` with a live SFTP channel on the blocking pool
    async fn with_sftp<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        let config = self.config.clone();
        let slot = Arc::clone(&self.connection);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("SFTP connection lock poisoned"))?;
            if guard.is_none() {
                *guard = Some(open(&config)?);
            }
            let result = match guard.as_ref() {
                Some(connection) => op(&connection.sftp),
                None => Err(RemoteError::Connection("no SFTP session".into()).into()),
            };
            if let Err(e) = &result {
                warn!(host = %config.host, error = %e, "SFTP operation failed, dropping session");
                *guard = None;
            }
            result
        })
        .await?
    }
}

fn open(config: &SftpConnectionConfig) -> Result<Connection> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let address = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", config.host))?
        .next()
        .ok_or_else(|| RemoteError::Connection(format!("no address for {}", config.host)))?;

    let tcp = TcpStream::connect_timeout(&address, timeout)
        .map_err(|e| RemoteError::Connection(format!("{address}: {e}")))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(config.connect_timeout_ms).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| RemoteError::Connection(format!("SSH handshake with {address}: {e}")))?;

    let auth = if let Some(password) = &config.password {
        session.userauth_password(&config.username, password)
    } else if let Some(key) = &config.private_key {
        session.userauth_pubkey_file(&config.username, None, key, config.passphrase.as_deref())
    } else {
        session.userauth_agent(&config.username)
    };
    auth.map_err(|e| RemoteError::Authentication(format!("{}@{}: {}", config.username, config.host, e)))?;
    if !session.authenticated() {
        return Err(RemoteError::Authentication(config.username.clone()).into());
    }

    let sftp = session.sftp()?;
    debug!(host = %config.host, port = config.port, "SFTP session opened");

    Ok(Connection {
        _session: session,
        sftp,
    })
}

#[async_trait::async_trait]
impl IEntryLister for SftpRemote {
    fn protocol(&self) -> &'static str {
        "sftp"
    }

    #[instrument(skip(self))]
    async fn list(&self, root: &str) -> Result<Vec<SourceEntry>> {
        let dir = PathBuf::from(root);
        self.with_sftp(move |sftp| {
            let listing = sftp
                .readdir(&dir)
                .with_context(|| format!("Failed to list {}", dir.display()))?;

            let mut entries = Vec::with_capacity(listing.len());
            for (path, stat) in listing {
                // readdir reports links as links; only plain files qualify
                if !stat.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let modified = stat
                    .mtime
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_default();
                entries.push(SourceEntry::file(name, modified, stat.size.unwrap_or(0))?);
            }
            Ok(entries)
        })
        .await
    }
}

#[async_trait::async_trait]
impl IRemoteTransfer for SftpRemote {
    #[instrument(skip(self, entry), fields(path = entry.path()))]
    async fn download(&self, root: &str, entry: &SourceEntry, dest: &Path) -> Result<u64> {
        let remote = join_remote(root, entry.path());
        let dest = dest.to_path_buf();
        self.with_sftp(move |sftp| {
            let mut source = sftp
                .open(Path::new(&remote))
                .with_context(|| format!("Failed to open {remote}"))?;
            let mut target = std::fs::File::create(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            let copied = io::copy(&mut source, &mut target)?;
            target.sync_all()?;
            debug!(bytes = copied, remote = %remote, "Downloaded");
            Ok(copied)
        })
        .await
    }

    #[instrument(skip(self, entry), fields(path = entry.path()))]
    async fn delete(&self, root: &str, entry: &SourceEntry) -> Result<()> {
        let remote = join_remote(root, entry.path());
        self.with_sftp(move |sftp| {
            sftp.unlink(Path::new(&remote))
                .with_context(|| format!("Failed to delete {remote}"))?;
            debug!(remote = %remote, "Deleted");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_fails_without_panicking() {
        let remote = SftpRemote::new(SftpConnectionConfig {
            host: "127.0.0.1".into(),
            port: 1,
            username: "nobody".into(),
            connect_timeout_ms: 200,
            ..SftpConnectionConfig::default()
        });
        assert_eq!(remote.protocol(), "sftp");
        assert!(remote.list("/outbound").await.is_err());
    }
}
