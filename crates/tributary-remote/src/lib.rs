//! Tributary Remote - SFTP and S3 adapters
//!
//! Each protocol is an independent struct implementing the `IEntryLister`
//! and `IRemoteTransfer` ports from `tributary-core`:
//!
//! - [`s3`] - bucket listing through `ListObjectsV2` (feature `s3`)
//! - [`sftp`] - directory listing over libssh2 (feature `sftp`)
//!
//! Adapters never retry; a failure fails the caller's poll cycle.

#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "sftp")]
pub mod sftp;

#[cfg(feature = "s3")]
pub use s3::S3Remote;
#[cfg(feature = "sftp")]
pub use sftp::SftpRemote;

use thiserror::Error;

/// Errors raised by the protocol adapters
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server could not be reached or the session broke
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The configured root cannot be interpreted by this protocol
    #[error("Invalid remote root '{0}'")]
    InvalidRoot(String),

    /// The protocol was selected but its cargo feature is not enabled
    #[error("Remote protocol '{0}' is not compiled in (enable feature '{0}')")]
    ProtocolDisabled(&'static str),
}

/// Whether `protocol` (`"sftp"` or `"s3"`) was compiled into this build
pub fn protocol_available(protocol: &str) -> bool {
    match protocol {
        "s3" => cfg!(feature = "s3"),
        "sftp" => cfg!(feature = "sftp"),
        _ => false,
    }
}

/// Joins a remote directory and a relative entry path with exactly one `/`
pub fn join_remote(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        format!("/{path}")
    } else {
        format!("{root}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/outbound", "a.txt"), "/outbound/a.txt");
        assert_eq!(join_remote("/outbound/", "a.txt"), "/outbound/a.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote("relative", "a.txt"), "relative/a.txt");
    }

    #[test]
    fn test_unknown_protocol_is_unavailable() {
        assert!(!protocol_available("ftp"));
    }
}
