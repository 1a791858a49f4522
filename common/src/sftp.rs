//! SFTP backend for the remote filesystem capability.
//!
//! One `SftpFs` wraps one endpoint. The SSH session is established lazily
//! on first use and kept for the lifetime of the handle; `ssh2` is a
//! blocking library, so every protocol call runs on the blocking thread
//! pool with the session behind a mutex. Workers fan out across endpoints,
//! requests to a single endpoint serialize at its session.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;

use crate::config::Endpoint;
use crate::path as rpath;
use crate::remote::{RemoteError, RemoteFs, RemoteInfo};

/// SFTP status code for a missing file (SSH_FX_NO_SUCH_FILE).
const SFTP_NO_SUCH_FILE: i32 = 2;
/// libssh2 session error for a transport-level disconnect.
const ERROR_SOCKET_DISCONNECT: i32 = -13;

const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// An SFTP endpoint as a [`RemoteFs`].
pub struct SftpFs {
    endpoint: Endpoint,
    address: String,
    session: Arc<Mutex<Option<ssh2::Sftp>>>,
}

impl SftpFs {
    pub fn new(endpoint: Endpoint) -> anyhow::Result<Self> {
        let address = endpoint_address(&endpoint.url)?;
        Ok(Self {
            endpoint,
            address,
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Run one blocking SFTP operation, establishing the session first if
    /// needed.
    async fn with_session<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&ssh2::Sftp) -> Result<T, RemoteError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        let endpoint = self.endpoint.clone();
        let address = self.address.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap();
            if guard.is_none() {
                *guard = Some(establish(&endpoint, &address)?);
            }
            op(guard.as_ref().expect("session populated above"))
        })
        .await
        .map_err(|join_error| RemoteError::Protocol(format!("sftp task failed: {join_error}")))?
    }
}

/// Derive the `host:port` dial address from an endpoint url. Accepted
/// forms: `sftp://host[:port]` (any path suffix is ignored) and a bare
/// `host[:port]`. The default port is 22.
pub fn endpoint_address(url: &str) -> anyhow::Result<String> {
    let rest = match url.split_once("://") {
        Some(("sftp", rest)) => rest,
        Some((scheme, _)) => bail!("{url:?}: unsupported scheme {scheme:?}"),
        None => url,
    };
    let host_port = rest.split('/').next().unwrap_or(rest).trim();
    if host_port.is_empty() {
        bail!("{url:?}: missing host");
    }
    if host_port.contains(':') {
        Ok(host_port.to_string())
    } else {
        Ok(format!("{host_port}:22"))
    }
}

fn establish(endpoint: &Endpoint, address: &str) -> Result<ssh2::Sftp, RemoteError> {
    let socket_address = address
        .to_socket_addrs()
        .map_err(RemoteError::Io)?
        .next()
        .ok_or_else(|| RemoteError::Protocol(format!("{address}: no addresses resolved")))?;
    let stream = TcpStream::connect_timeout(&socket_address, IO_TIMEOUT).map_err(RemoteError::Io)?;
    let mut session = ssh2::Session::new().map_err(|error| map_ssh_error(None, &error))?;
    session.set_tcp_stream(stream);
    session.set_timeout(IO_TIMEOUT.as_millis() as u32);
    session
        .handshake()
        .map_err(|error| map_ssh_error(None, &error))?;
    authenticate(&session, endpoint)?;
    session.sftp().map_err(|error| map_ssh_error(None, &error))
}

fn authenticate(session: &ssh2::Session, endpoint: &Endpoint) -> Result<(), RemoteError> {
    if !endpoint.password.is_empty() {
        return session
            .userauth_password(&endpoint.username, &endpoint.password)
            .map_err(|error| map_ssh_error(None, &error));
    }
    // no password configured: try the agent, then the usual key files
    if session.userauth_agent(&endpoint.username).is_ok() && session.authenticated() {
        return Ok(());
    }
    if let Some(home) = dirs::home_dir() {
        for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
            let key = home.join(".ssh").join(name);
            if key.exists()
                && session
                    .userauth_pubkey_file(&endpoint.username, None, &key, None)
                    .is_ok()
            {
                return Ok(());
            }
        }
    }
    Err(RemoteError::Protocol(format!(
        "authentication failed for {}@{}",
        endpoint.username, endpoint.url
    )))
}

fn map_ssh_error(op_path: Option<&str>, error: &ssh2::Error) -> RemoteError {
    match error.code() {
        ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => RemoteError::NotFound {
            path: op_path.unwrap_or_default().to_string(),
        },
        ssh2::ErrorCode::Session(ERROR_SOCKET_DISCONNECT) => RemoteError::Disconnect {
            message: error.message().to_string(),
        },
        _ => RemoteError::Protocol(match op_path {
            Some(op_path) => format!("{op_path}: {}", error.message()),
            None => error.message().to_string(),
        }),
    }
}

fn info_from_stat(stat_path: &str, stat: &ssh2::FileStat) -> RemoteInfo {
    RemoteInfo {
        name: rpath::base_name(stat_path).to_string(),
        size: stat.size.unwrap_or(0),
        // zero means the server did not report a time
        mtime: stat
            .mtime
            .filter(|&secs| secs > 0)
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        mode: stat.perm.unwrap_or(0),
        is_dir: stat.is_dir(),
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn connect(&self) -> Result<(), RemoteError> {
        // establishing the session performs the SSH handshake and auth; the
        // realpath round-trip validates that the SFTP channel actually
        // serves requests
        self.with_session(|sftp| {
            sftp.realpath(Path::new("/"))
                .map(|_| ())
                .map_err(|error| map_ssh_error(Some("/"), &error))
        })
        .await
    }

    async fn stat(&self, stat_path: &str) -> Result<RemoteInfo, RemoteError> {
        let stat_path = stat_path.to_string();
        self.with_session(move |sftp| {
            let stat = sftp
                .stat(Path::new(&stat_path))
                .map_err(|error| map_ssh_error(Some(&stat_path), &error))?;
            Ok(info_from_stat(&stat_path, &stat))
        })
        .await
    }

    async fn read_dir(&self, dir_path: &str) -> Result<Vec<RemoteInfo>, RemoteError> {
        let dir_path = dir_path.to_string();
        self.with_session(move |sftp| {
            let children = sftp
                .readdir(Path::new(&dir_path))
                .map_err(|error| map_ssh_error(Some(&dir_path), &error))?;
            Ok(children
                .into_iter()
                .filter_map(|(child_path, stat)| {
                    let name = child_path.file_name()?.to_string_lossy().into_owned();
                    Some(info_from_stat(&name, &stat))
                })
                .collect())
        })
        .await
    }

    async fn read_file(&self, file_path: &str) -> Result<Bytes, RemoteError> {
        let file_path = file_path.to_string();
        self.with_session(move |sftp| {
            let mut file = sftp
                .open(Path::new(&file_path))
                .map_err(|error| map_ssh_error(Some(&file_path), &error))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data).map_err(RemoteError::Io)?;
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn write_file(&self, file_path: &str, data: Bytes, mode: u32) -> Result<(), RemoteError> {
        let file_path = file_path.to_string();
        self.with_session(move |sftp| {
            let mut file = sftp
                .open_mode(
                    Path::new(&file_path),
                    ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                    mode as i32,
                    ssh2::OpenType::File,
                )
                .map_err(|error| map_ssh_error(Some(&file_path), &error))?;
            file.write_all(&data).map_err(RemoteError::Io)?;
            Ok(())
        })
        .await
    }

    async fn mkdir_all(&self, dir_path: &str, mode: u32) -> Result<(), RemoteError> {
        let dir_path = dir_path.to_string();
        self.with_session(move |sftp| {
            let mut prefix = String::new();
            for part in dir_path.split('/').filter(|part| !part.is_empty()) {
                prefix.push('/');
                prefix.push_str(part);
                let prefix_path = Path::new(&prefix);
                if sftp.stat(prefix_path).is_ok() {
                    continue;
                }
                if let Err(error) = sftp.mkdir(prefix_path, mode as i32) {
                    // a sibling worker may have created it in the meantime
                    if sftp.stat(prefix_path).is_err() {
                        return Err(map_ssh_error(Some(&prefix), &error));
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_defaults_to_port_22() {
        assert_eq!(endpoint_address("sftp://files.example.com").unwrap(), "files.example.com:22");
    }

    #[test]
    fn address_keeps_explicit_port() {
        assert_eq!(
            endpoint_address("sftp://files.example.com:2222").unwrap(),
            "files.example.com:2222"
        );
    }

    #[test]
    fn address_ignores_path_suffix_and_scheme() {
        assert_eq!(
            endpoint_address("sftp://files.example.com/data").unwrap(),
            "files.example.com:22"
        );
        assert_eq!(endpoint_address("files.example.com").unwrap(), "files.example.com:22");
    }

    #[test]
    fn address_rejects_other_schemes() {
        let error = endpoint_address("http://files.example.com").unwrap_err();
        assert!(error.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn address_rejects_missing_host() {
        assert!(endpoint_address("sftp://").is_err());
    }

    #[test]
    fn stat_mtime_zero_is_unset() {
        let stat = ssh2::FileStat {
            size: Some(10),
            uid: None,
            gid: None,
            perm: Some(0o100644),
            atime: None,
            mtime: Some(0),
        };
        let info = info_from_stat("/data/a.txt", &stat);
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 10);
        assert!(info.mtime.is_none());
        assert!(!info.is_dir);
    }
}
