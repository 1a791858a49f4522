//! The clone engine: connection establishment, directory provisioning and
//! the bounded fan-out copy pipeline.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, Endpoint, Job};
use crate::remote::RemoteFs;
use crate::walk::{self, RemoteEntry};
use crate::{Cancelled, filecmp, is_cancelled, path};

/// Mode used when provisioning directories on targets.
const DIR_MODE: u32 = 0o755;

/// Runtime options for a clone run.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Log intended actions without performing any protocol mutation.
    pub dry_run: bool,
    /// Global default for concurrent copy workers per job; a positive
    /// per-job value wins. The effective value is clamped to at least 1.
    pub concurrency: usize,
    /// Render a per-job progress bar, advanced once per file entry.
    pub show_progress: bool,
}

/// Connects an endpoint to its protocol client. The binary wires this to
/// the SFTP backend; tests substitute in-memory fakes.
pub type Connector<'a> = dyn Fn(&Endpoint) -> anyhow::Result<Arc<dyn RemoteFs>> + Sync + 'a;

/// Error type for clone operations that preserves the operation summary
/// accumulated before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Copy, Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub files_unchanged: usize,
    pub directories_created: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            files_unchanged: self.files_unchanged + other.files_unchanged,
            directories_created: self.directories_created + other.directories_created,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files unchanged: {}\n\
            directories created: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.files_unchanged,
            self.directories_created,
        )
    }
}

/// Pairs one endpoint with its established protocol client for the
/// duration of a job.
pub struct ClientWrapper {
    pub endpoint: Endpoint,
    pub client: Arc<dyn RemoteFs>,
}

/// Run all configured jobs strictly in order, stopping at the first job
/// that fails. Cancellation is checked before each job starts.
pub async fn run(
    token: &CancellationToken,
    config: &Config,
    settings: &Settings,
    connect: &Connector<'_>,
) -> Result<Summary, Error> {
    let mut total = Summary::default();
    for job in &config.jobs {
        if token.is_cancelled() {
            return Err(Error::new(Cancelled.into(), total));
        }
        match run_job(token, job, settings, connect).await {
            Ok(job_summary) => total = total + job_summary,
            Err(error) => {
                let summary = total + error.summary;
                return Err(Error::new(error.source.context(job.name.clone()), summary));
            }
        }
    }
    Ok(total)
}

async fn run_job(
    token: &CancellationToken,
    job: &Job,
    settings: &Settings,
    connect: &Connector<'_>,
) -> Result<Summary, Error> {
    let fail = |error: anyhow::Error| Error::new(error, Summary::default());

    info!("{}: preparing source {}", job.name, job.source.url);
    let source = connect(&job.source).map_err(fail)?;
    ensure_connected(source.as_ref(), &job.source.root)
        .await
        .with_context(|| format!("connect source {}", job.source.url))
        .map_err(fail)?;

    let mut targets = Vec::with_capacity(job.targets.len());
    for target in &job.targets {
        info!("{}: preparing target {}", job.name, target.url);
        let client = connect(target).map_err(fail)?;
        ensure_connected(client.as_ref(), &target.root)
            .await
            .with_context(|| format!("connect target {}", target.url))
            .map_err(fail)?;
        targets.push(ClientWrapper {
            endpoint: target.clone(),
            client,
        });
    }
    let targets = Arc::new(targets);

    let source_root = if job.path.is_empty() {
        path::ensure_absolute(&job.source.root)
    } else {
        path::ensure_absolute(&path::join_remote(&job.source.root, &job.path))
    };

    info!(
        "{}: cloning {} -> {} target(s)",
        job.name,
        source_root,
        targets.len()
    );

    let (files, directories) = walk::gather_remote_entries(token, source.as_ref(), &source_root)
        .await
        .context("gather entries")
        .map_err(fail)?;

    // barrier: every directory exists on every target before any copy starts
    let mut summary =
        provision_directories(token, &directories, &targets, settings.dry_run, &job.name)
            .await
            .map_err(fail)?;

    let progress = (settings.show_progress && !files.is_empty()).then(|| {
        let bar = indicatif::ProgressBar::new(files.len() as u64);
        bar.set_style(
            indicatif::ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                .expect("static progress template"),
        );
        bar.set_message(job.name.clone());
        bar
    });

    let concurrency = effective_concurrency(job, settings);
    summary = summary
        + dispatch_entries(
            token,
            files,
            source,
            targets,
            concurrency,
            settings.dry_run,
            progress,
            &job.name,
        )
        .await
        .map_err(|error| Error::new(error.source, summary + error.summary))?;

    info!("{}: finished", job.name);
    Ok(summary)
}

/// Open and validate the connection to one endpoint. A negotiation failure
/// that looks like a premature stream termination is resolved through two
/// independent liveness probes against `probe_root`: some servers reject
/// the capability-discovery request while serving ordinary requests. Any
/// other failure, or failure of both probes, is fatal for the endpoint.
pub async fn ensure_connected(client: &dyn RemoteFs, probe_root: &str) -> anyhow::Result<()> {
    let Err(error) = client.connect().await else {
        return Ok(());
    };
    if !error.is_disconnect() {
        return Err(error.into());
    }
    if client.stat(probe_root).await.is_ok() {
        info!("connection fallback succeeded via stat despite: {error}");
        return Ok(());
    }
    if client.read_dir(probe_root).await.is_ok() {
        info!("connection fallback succeeded via listing despite: {error}");
        return Ok(());
    }
    Err(error.into())
}

fn effective_concurrency(job: &Job, settings: &Settings) -> usize {
    let concurrency = if job.concurrency > 0 {
        job.concurrency
    } else {
        settings.concurrency
    };
    concurrency.max(1)
}

async fn provision_directories(
    token: &CancellationToken,
    directories: &[String],
    targets: &[ClientWrapper],
    dry_run: bool,
    job_name: &str,
) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();
    for relative in directories {
        for target in targets {
            if token.is_cancelled() {
                return Err(Cancelled.into());
            }
            let target_path = path::join_remote(&target.endpoint.root, relative);
            if dry_run {
                info!(
                    "{job_name}: dry-run mkdir {}{}",
                    target.endpoint.url, target_path
                );
                continue;
            }
            target
                .client
                .mkdir_all(&target_path, DIR_MODE)
                .await
                .with_context(|| {
                    format!("create directory {} on {}", target_path, target.endpoint.url)
                })?;
            debug!("{job_name}: created {}{}", target.endpoint.url, target_path);
            summary.directories_created += 1;
        }
    }
    Ok(summary)
}

/// Feed the enumerated entries through a bounded queue into a fixed pool of
/// copy workers. The first error from any worker cancels the copy-phase
/// token, which unblocks the producer and the remaining workers; sibling
/// cancellations never mask the originating error.
#[allow(clippy::too_many_arguments)]
async fn dispatch_entries(
    token: &CancellationToken,
    entries: Vec<RemoteEntry>,
    source: Arc<dyn RemoteFs>,
    targets: Arc<Vec<ClientWrapper>>,
    concurrency: usize,
    dry_run: bool,
    progress: Option<indicatif::ProgressBar>,
    job_name: &str,
) -> Result<Summary, Error> {
    let copy_token = token.child_token();
    let (sender, receiver) = async_channel::bounded::<RemoteEntry>(concurrency);
    let mut join_set = tokio::task::JoinSet::new();

    {
        let copy_token = copy_token.clone();
        join_set.spawn(async move {
            for entry in entries {
                tokio::select! {
                    () = copy_token.cancelled() => return Err::<Summary, anyhow::Error>(Cancelled.into()),
                    sent = sender.send(entry) => {
                        if sent.is_err() {
                            // every worker has exited; nothing left to feed
                            break;
                        }
                    }
                }
            }
            Ok(Summary::default())
        });
    }

    for _ in 0..concurrency {
        let receiver = receiver.clone();
        let copy_token = copy_token.clone();
        let source = source.clone();
        let targets = targets.clone();
        let progress = progress.clone();
        let job_name = job_name.to_string();
        join_set.spawn(async move {
            let mut summary = Summary::default();
            loop {
                let entry = tokio::select! {
                    () = copy_token.cancelled() => return Err(Cancelled.into()),
                    received = receiver.recv() => match received {
                        Ok(entry) => entry,
                        // queue drained and closed
                        Err(_) => return Ok(summary),
                    },
                };
                summary = summary
                    + copy_entry(
                        &copy_token,
                        source.as_ref(),
                        &targets,
                        &entry,
                        dry_run,
                        &job_name,
                    )
                    .await?;
                if let Some(progress) = &progress {
                    progress.inc(1);
                }
            }
        });
    }
    drop(receiver);

    let mut summary = Summary::default();
    let mut first_error: Option<anyhow::Error> = None;
    while let Some(joined) = join_set.join_next().await {
        let result = joined
            .unwrap_or_else(|join_error| Err(anyhow!(join_error).context("copy worker panicked")));
        match result {
            Ok(worker_summary) => summary = summary + worker_summary,
            Err(error) => {
                copy_token.cancel();
                let replace = match &first_error {
                    None => true,
                    Some(current) => is_cancelled(current) && !is_cancelled(&error),
                };
                if replace {
                    first_error = Some(error);
                }
            }
        }
    }
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }
    match first_error {
        Some(error) => Err(Error::new(error, summary)),
        None => Ok(summary),
    }
}

async fn copy_entry(
    token: &CancellationToken,
    source: &dyn RemoteFs,
    targets: &[ClientWrapper],
    entry: &RemoteEntry,
    dry_run: bool,
    job_name: &str,
) -> anyhow::Result<Summary> {
    if dry_run {
        for target in targets {
            let target_path = path::join_remote(&target.endpoint.root, &entry.relative);
            info!(
                "{job_name}: dry-run copy {} -> {}{}",
                entry.source_path, target.endpoint.url, target_path
            );
        }
        return Ok(Summary::default());
    }

    // the source object is read exactly once per entry, then fanned out
    let data = source
        .read_file(&entry.source_path)
        .await
        .with_context(|| format!("read {}", entry.source_path))?;

    let mut summary = Summary::default();
    let mut copied_logged = false;
    for target in targets {
        if token.is_cancelled() {
            return Err(Cancelled.into());
        }
        let target_path = path::join_remote(&target.endpoint.root, &entry.relative);
        let skip = filecmp::should_skip(target.client.as_ref(), &target_path, &entry.info)
            .await
            .with_context(|| format!("inspect {}{}", target.endpoint.url, target_path))?;
        if skip {
            info!(
                "{job_name}: skipped {} -> {}{} (up-to-date)",
                entry.source_path, target.endpoint.url, target_path
            );
            summary.files_unchanged += 1;
            continue;
        }
        // the parent may have been removed since provisioning by another
        // actor; re-create it before writing
        target
            .client
            .mkdir_all(&path::parent(&target_path), DIR_MODE)
            .await
            .with_context(|| {
                format!("prepare parent for {}{}", target.endpoint.url, target_path)
            })?;
        target
            .client
            .write_file(&target_path, data.clone(), entry.info.mode & 0o7777)
            .await
            .with_context(|| format!("write to {}{}", target.endpoint.url, target_path))?;
        summary.bytes_copied += data.len() as u64;
        if !copied_logged {
            info!(
                "{job_name}: copied {} ({} bytes)",
                entry.source_path,
                data.len()
            );
            summary.files_copied += 1;
            copied_logged = true;
        }
        // the remote server may adjust the stored modification time itself
    }
    Ok(summary)
}
