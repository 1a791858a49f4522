//! In-memory remote filesystem for engine tests.

#[cfg(test)]
use std::collections::{BTreeMap, HashSet};
#[cfg(test)]
use std::sync::Mutex;
#[cfg(test)]
use std::time::{Duration, UNIX_EPOCH};

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use bytes::Bytes;

#[cfg(test)]
use crate::path;
#[cfg(test)]
use crate::remote::{RemoteError, RemoteFs, RemoteInfo};

/// One recorded protocol operation, in call order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect,
    Stat(String),
    ReadDir(String),
    Read(String),
    Write(String),
    Mkdir(String),
}

#[cfg(test)]
#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        data: Bytes,
        mtime: Option<u64>,
        mode: u32,
    },
}

/// How [`MemoryFs::connect`] behaves.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    /// Fail with the ambiguous end-of-stream signal the establisher may
    /// bypass via probing.
    AmbiguousEof,
    /// Fail with a definite, non-bypassable error.
    Refused,
}

/// In-memory [`RemoteFs`] recording every operation, with per-path failure
/// injection. Written files get their mtime from a settable clock so diff
/// policy behavior stays deterministic.
#[cfg(test)]
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<String, Node>>,
    ops: Mutex<Vec<Op>>,
    connect_behavior: Mutex<ConnectBehavior>,
    fail_stat: Mutex<HashSet<String>>,
    fail_read: Mutex<HashSet<String>>,
    fail_close: Mutex<HashSet<String>>,
    fail_write: Mutex<HashSet<String>>,
    write_clock: Mutex<u64>,
    write_delay: Mutex<Option<Duration>>,
}

#[cfg(test)]
impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            ops: Mutex::new(Vec::new()),
            connect_behavior: Mutex::new(ConnectBehavior::Succeed),
            fail_stat: Mutex::new(HashSet::new()),
            fail_read: Mutex::new(HashSet::new()),
            fail_close: Mutex::new(HashSet::new()),
            fail_write: Mutex::new(HashSet::new()),
            write_clock: Mutex::new(1_000),
            write_delay: Mutex::new(None),
        }
    }

    pub fn add_dir(&self, dir_path: &str) {
        let dir_path = path::ensure_absolute(dir_path);
        let mut nodes = self.nodes.lock().unwrap();
        for prefix in prefixes(&dir_path) {
            nodes.entry(prefix).or_insert(Node::Dir);
        }
    }

    pub fn add_file(&self, file_path: &str, data: &[u8], mtime: Option<u64>, mode: u32) {
        let file_path = path::ensure_absolute(file_path);
        self.add_dir(&path::parent(&file_path));
        self.nodes.lock().unwrap().insert(
            file_path,
            Node::File {
                data: Bytes::copy_from_slice(data),
                mtime,
                mode,
            },
        );
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        *self.connect_behavior.lock().unwrap() = behavior;
    }

    pub fn fail_stat_on(&self, stat_path: &str) {
        self.fail_stat
            .lock()
            .unwrap()
            .insert(path::ensure_absolute(stat_path));
    }

    pub fn fail_read_on(&self, read_path: &str) {
        self.fail_read
            .lock()
            .unwrap()
            .insert(path::ensure_absolute(read_path));
    }

    pub fn fail_close_on(&self, read_path: &str) {
        self.fail_close
            .lock()
            .unwrap()
            .insert(path::ensure_absolute(read_path));
    }

    pub fn fail_write_on(&self, write_path: &str) {
        self.fail_write
            .lock()
            .unwrap()
            .insert(path::ensure_absolute(write_path));
    }

    /// Modification time assigned to subsequently written files.
    pub fn set_write_clock(&self, secs: u64) {
        *self.write_clock.lock().unwrap() = secs;
    }

    /// Delay applied inside every write, for cancellation tests.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn write_ops(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(write_path) => Some(write_path),
                _ => None,
            })
            .collect()
    }

    /// True when no mutating operation was issued.
    pub fn untouched(&self) -> bool {
        !self
            .ops()
            .iter()
            .any(|op| matches!(op, Op::Write(_) | Op::Mkdir(_)))
    }

    pub fn file_content(&self, file_path: &str) -> Option<Bytes> {
        match self.nodes.lock().unwrap().get(&path::ensure_absolute(file_path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn file_mode(&self, file_path: &str) -> Option<u32> {
        match self.nodes.lock().unwrap().get(&path::ensure_absolute(file_path)) {
            Some(Node::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    pub fn has_dir(&self, dir_path: &str) -> bool {
        matches!(
            self.nodes.lock().unwrap().get(&path::ensure_absolute(dir_path)),
            Some(Node::Dir)
        )
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn info_for(node_path: &str, node: &Node) -> RemoteInfo {
        match node {
            Node::Dir => RemoteInfo {
                name: path::base_name(node_path).to_string(),
                size: 0,
                mtime: None,
                mode: 0o755,
                is_dir: true,
            },
            Node::File { data, mtime, mode } => RemoteInfo {
                name: path::base_name(node_path).to_string(),
                size: data.len() as u64,
                mtime: mtime.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
                mode: *mode,
                is_dir: false,
            },
        }
    }
}

#[cfg(test)]
fn prefixes(dir_path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut acc = String::new();
    for part in dir_path.split('/').filter(|part| !part.is_empty()) {
        acc.push('/');
        acc.push_str(part);
        out.push(acc.clone());
    }
    out
}

#[cfg(test)]
#[async_trait]
impl RemoteFs for MemoryFs {
    async fn connect(&self) -> Result<(), RemoteError> {
        self.record(Op::Connect);
        match *self.connect_behavior.lock().unwrap() {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::AmbiguousEof => Err(RemoteError::Disconnect {
                message: "unexpected EOF during negotiation".to_string(),
            }),
            ConnectBehavior::Refused => Err(RemoteError::Protocol(
                "connection refused".to_string(),
            )),
        }
    }

    async fn stat(&self, stat_path: &str) -> Result<RemoteInfo, RemoteError> {
        let stat_path = path::ensure_absolute(stat_path);
        self.record(Op::Stat(stat_path.clone()));
        if self.fail_stat.lock().unwrap().contains(&stat_path) {
            return Err(RemoteError::Protocol(format!(
                "stat {stat_path}: injected failure"
            )));
        }
        match self.nodes.lock().unwrap().get(&stat_path) {
            Some(node) => Ok(Self::info_for(&stat_path, node)),
            None => Err(RemoteError::NotFound { path: stat_path }),
        }
    }

    async fn read_dir(&self, dir_path: &str) -> Result<Vec<RemoteInfo>, RemoteError> {
        let dir_path = path::ensure_absolute(dir_path);
        self.record(Op::ReadDir(dir_path.clone()));
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&dir_path) {
            Some(Node::Dir) => {}
            Some(Node::File { .. }) => {
                return Err(RemoteError::Protocol(format!(
                    "{dir_path}: not a directory"
                )));
            }
            None => return Err(RemoteError::NotFound { path: dir_path }),
        }
        let prefix = if dir_path == "/" {
            "/".to_string()
        } else {
            format!("{dir_path}/")
        };
        Ok(nodes
            .iter()
            .filter(|(node_path, _)| {
                node_path.starts_with(&prefix)
                    && !node_path[prefix.len()..].is_empty()
                    && !node_path[prefix.len()..].contains('/')
            })
            .map(|(node_path, node)| Self::info_for(node_path, node))
            .collect())
    }

    async fn read_file(&self, file_path: &str) -> Result<Bytes, RemoteError> {
        let file_path = path::ensure_absolute(file_path);
        self.record(Op::Read(file_path.clone()));
        if self.fail_read.lock().unwrap().contains(&file_path) {
            return Err(RemoteError::Protocol(format!(
                "read {file_path}: injected failure"
            )));
        }
        let data = match self.nodes.lock().unwrap().get(&file_path) {
            Some(Node::File { data, .. }) => data.clone(),
            Some(Node::Dir) => {
                return Err(RemoteError::Protocol(format!(
                    "{file_path}: is a directory"
                )));
            }
            None => return Err(RemoteError::NotFound { path: file_path }),
        };
        if self.fail_close.lock().unwrap().contains(&file_path) {
            return Err(RemoteError::Protocol(format!(
                "close {file_path}: injected failure"
            )));
        }
        Ok(data)
    }

    async fn write_file(&self, file_path: &str, data: Bytes, mode: u32) -> Result<(), RemoteError> {
        let file_path = path::ensure_absolute(file_path);
        self.record(Op::Write(file_path.clone()));
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_write.lock().unwrap().contains(&file_path) {
            return Err(RemoteError::Protocol(format!(
                "write {file_path}: injected failure"
            )));
        }
        let mtime = *self.write_clock.lock().unwrap();
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&path::parent(&file_path)) {
            Some(Node::Dir) => {}
            _ => {
                return Err(RemoteError::NotFound {
                    path: path::parent(&file_path),
                });
            }
        }
        nodes.insert(
            file_path,
            Node::File {
                data,
                mtime: Some(mtime),
                mode,
            },
        );
        Ok(())
    }

    async fn mkdir_all(&self, dir_path: &str, _mode: u32) -> Result<(), RemoteError> {
        let dir_path = path::ensure_absolute(dir_path);
        self.record(Op::Mkdir(dir_path.clone()));
        let mut nodes = self.nodes.lock().unwrap();
        for prefix in prefixes(&dir_path) {
            if let Some(Node::File { .. }) = nodes.get(&prefix) {
                return Err(RemoteError::Protocol(format!(
                    "{prefix}: not a directory"
                )));
            }
            nodes.entry(prefix).or_insert(Node::Dir);
        }
        Ok(())
    }
}
