//! Internal library for the `rfan` replication tool.
//!
//! The engine replicates a directory subtree from one remote filesystem
//! endpoint to one or more remote targets. Remote access goes through the
//! [`remote::RemoteFs`] capability; the production backend speaks SFTP
//! ([`sftp::SftpFs`]), tests use the in-memory fake from [`testutils`].

pub mod clone;
pub mod config;
pub mod filecmp;
pub mod path;
pub mod remote;
pub mod sftp;
pub mod testutils;
pub mod walk;

/// Marker error reported when a job stops because the cancellation signal
/// tripped, rather than because an I/O operation failed.
#[derive(Debug, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Whether `error` unwinds from a cancellation rather than an I/O failure.
pub fn is_cancelled(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<Cancelled>())
}
