//! The remote filesystem capability consumed by the clone engine.
//!
//! The engine never talks to a protocol directly; it drives a [`RemoteFs`]
//! trait object. The production backend is [`crate::sftp::SftpFs`].

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;

/// Metadata for one remote object, as reported by `stat` or a directory
/// listing.
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    /// Base name of the object.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Modification time; `None` models the protocol's zero/unset value.
    pub mtime: Option<SystemTime>,
    /// Permission/mode bits.
    pub mode: u32,
    /// Whether the object is a directory.
    pub is_dir: bool,
}

impl RemoteInfo {
    /// Modification time truncated to whole seconds since the epoch.
    pub fn mtime_secs(&self) -> Option<u64> {
        self.mtime
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map(|since_epoch| since_epoch.as_secs())
    }
}

/// Errors surfaced by a remote filesystem backend.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The addressed object does not exist. Mapped from the protocol's
    /// not-found status; the diff policy treats this as benign.
    #[error("{path}: not found")]
    NotFound { path: String },

    /// The peer terminated the stream unexpectedly. During connection
    /// negotiation this is the only failure the establisher may bypass.
    #[error("connection closed unexpectedly: {message}")]
    Disconnect { message: String },

    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other protocol-level failure.
    #[error("{0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// Whether this looks like a premature stream termination during
    /// negotiation. Besides the typed signals, the lowercased error text of
    /// transport errors is matched against "eof": some servers wrap their
    /// disconnects in opaque messages, and rejecting those outright would
    /// make the tool unusable against them. `NotFound` never qualifies.
    pub fn is_disconnect(&self) -> bool {
        match self {
            RemoteError::Disconnect { .. } => true,
            RemoteError::Io(error) => {
                error.kind() == std::io::ErrorKind::UnexpectedEof
                    || error.to_string().to_lowercase().contains("eof")
            }
            RemoteError::Protocol(message) => message.to_lowercase().contains("eof"),
            RemoteError::NotFound { .. } => false,
        }
    }
}

/// One remote filesystem endpoint.
///
/// Implementations must be safe for concurrent callers: the copy dispatcher
/// shares one handle per endpoint across all workers.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Establish and validate the connection (protocol negotiation).
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Metadata for one object.
    async fn stat(&self, path: &str) -> Result<RemoteInfo, RemoteError>;

    /// Immediate children of a directory.
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteInfo>, RemoteError>;

    /// Read an object to completion and close it. A close failure after a
    /// successful read must be reported as an error.
    async fn read_file(&self, path: &str) -> Result<Bytes, RemoteError>;

    /// Write a full object, creating or truncating it, with the given
    /// permission bits.
    async fn write_file(&self, path: &str, data: Bytes, mode: u32) -> Result<(), RemoteError>;

    /// Recursively create a directory path. Creating an existing directory
    /// is not an error.
    async fn mkdir_all(&self, path: &str, mode: u32) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        assert!(
            RemoteError::Disconnect {
                message: "negotiation failed".to_string()
            }
            .is_disconnect()
        );
        assert!(
            RemoteError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "early close"
            ))
            .is_disconnect()
        );
        // textual fallback on transport errors
        assert!(RemoteError::Protocol("transport: unexpected EOF".to_string()).is_disconnect());
        assert!(!RemoteError::Protocol("permission denied".to_string()).is_disconnect());
        // a path containing "eof" must not trigger the textual fallback
        assert!(
            !RemoteError::NotFound {
                path: "/geofence.txt".to_string()
            }
            .is_disconnect()
        );
    }

    #[test]
    fn mtime_secs_truncates() {
        let info = RemoteInfo {
            name: "a".to_string(),
            size: 1,
            mtime: Some(UNIX_EPOCH + std::time::Duration::from_millis(100_900)),
            mode: 0o644,
            is_dir: false,
        };
        assert_eq!(info.mtime_secs(), Some(100));
    }
}
