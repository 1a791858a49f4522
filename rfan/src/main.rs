use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use common::clone;
use common::config;
use common::remote::RemoteFs;
use common::sftp::SftpFs;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rfan",
    version,
    about = "Replicate a remote directory tree to one or more remote targets",
    long_about = "`rfan` clones a directory subtree from one SFTP endpoint to any number of \
SFTP targets, driven by a declarative YAML job list.

Each job names a source, its targets and an optional subpath. Files already \
present on a target with matching size and a modification time no older than \
the source's are skipped; everything else is copied through a bounded pool of \
parallel workers, after all required directories have been created."
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: std::path::PathBuf,

    // Copy options
    /// Print actions without copying data
    #[arg(long, help_heading = "Copy options")]
    dry_run: bool,

    /// Concurrent file copy workers per job (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Copy options"
    )]
    concurrency: usize,

    // Progress & output
    /// Disable the progress bar
    #[arg(long, help_heading = "Progress & output")]
    no_progress: bool,

    /// Print summary statistics at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, only report errors
    #[arg(short, long, help_heading = "Progress & output")]
    quiet: bool,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Trip the token on SIGINT or SIGTERM so jobs can unwind cleanly.
async fn watch_signals(token: CancellationToken) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!("cannot install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::warn!("cannot wait for ctrl-c: {error}");
                std::future::pending::<()>().await;
            }
        }
        () = terminate => {}
    }
    tracing::warn!("termination requested, stopping after the current operations");
    token.cancel();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("failed to load config: {error:#}");
            std::process::exit(1);
        }
    };

    let token = CancellationToken::new();
    tokio::spawn(watch_signals(token.clone()));

    let concurrency = if args.concurrency > 0 {
        args.concurrency
    } else {
        std::thread::available_parallelism().map_or(1, |cores| cores.get())
    };
    let settings = clone::Settings {
        dry_run: args.dry_run,
        concurrency,
        show_progress: !args.no_progress,
    };

    let connect = |endpoint: &config::Endpoint| -> anyhow::Result<Arc<dyn RemoteFs>> {
        Ok(Arc::new(SftpFs::new(endpoint.clone())?))
    };

    match clone::run(&token, &config, &settings, &connect).await {
        Ok(summary) => {
            if args.summary {
                println!("{summary}");
            }
        }
        Err(error) => {
            if common::is_cancelled(&error.source) {
                tracing::error!("clone interrupted: {error:#}");
            } else {
                tracing::error!("clone failed: {error:#}");
            }
            if args.summary {
                println!("{}", error.summary);
            }
            std::process::exit(1);
        }
    }
}
