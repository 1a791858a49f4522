//! Remote tree enumeration.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tokio_util::sync::CancellationToken;

use crate::Cancelled;
use crate::path;
use crate::remote::{RemoteFs, RemoteInfo};

/// One enumerated source file. The relative path is the join key between
/// the source tree and every target tree.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Absolute path on the source endpoint.
    pub source_path: String,
    /// Path relative to the enumeration root.
    pub relative: String,
    pub info: RemoteInfo,
}

/// Walk the subtree rooted at `root`, depth-first pre-order, and return the
/// flat set of file entries plus the sorted, deduplicated set of directory
/// paths relative to `root`. When `root` itself is not a directory the
/// result is that single entry, keyed by its own base name.
pub async fn gather_remote_entries(
    token: &CancellationToken,
    client: &dyn RemoteFs,
    root: &str,
) -> Result<(Vec<RemoteEntry>, Vec<String>)> {
    let root_info = client
        .stat(root)
        .await
        .with_context(|| format!("stat {root}"))?;
    let mut files = Vec::new();
    if !root_info.is_dir {
        files.push(RemoteEntry {
            source_path: root.to_string(),
            relative: path::relative_path(root, root),
            info: root_info,
        });
        return Ok((files, Vec::new()));
    }
    let mut directories = BTreeSet::new();
    walk_dir(token, client, root, root, &mut files, &mut directories).await?;
    Ok((files, directories.into_iter().collect()))
}

#[async_recursion]
async fn walk_dir(
    token: &CancellationToken,
    client: &dyn RemoteFs,
    enumeration_root: &str,
    dir: &str,
    files: &mut Vec<RemoteEntry>,
    directories: &mut BTreeSet<String>,
) -> Result<()> {
    let children = client
        .read_dir(dir)
        .await
        .with_context(|| format!("list {dir}"))?;
    for child in children {
        if token.is_cancelled() {
            return Err(Cancelled.into());
        }
        let current = path::join_remote(dir, &child.name);
        let relative = path::relative_path(enumeration_root, &current);
        if child.is_dir {
            if !relative.is_empty() {
                directories.insert(relative);
            }
            walk_dir(token, client, enumeration_root, &current, files, directories).await?;
        } else {
            files.push(RemoteEntry {
                source_path: current,
                relative,
                info: child,
            });
        }
    }
    Ok(())
}
