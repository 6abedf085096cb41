//! albumsync command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use albumsync_rest::RestPhotosClient;
use albumsync_uploader::{
    LogProgressSink, Runner, StateStore, SystemClock, UploaderConfig,
};

/// Uploads a directory tree of photos and videos to Google Photos,
/// mirroring directories as albums and resuming interrupted runs.
#[derive(Debug, Parser)]
#[command(name = "albumsync", version)]
struct Args {
    /// Source directory to upload.
    #[arg(short = 'r', long = "root")]
    root: PathBuf,

    /// Ignore previously recorded uploads; upload every file again.
    #[arg(long = "no-resume")]
    no_resume: bool,

    /// Number of concurrent uploads (defaults to the CPU count).
    #[arg(long)]
    parallelism: Option<usize>,

    /// Path of the upload-state file (defaults to the per-user data dir).
    #[arg(long)]
    state_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.root.is_dir(),
        "path is not a directory: {}",
        args.root.display()
    );

    let access_token = std::env::var("ALBUMSYNC_ACCESS_TOKEN")
        .context("ALBUMSYNC_ACCESS_TOKEN must hold a Google Photos OAuth access token")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %args.root.display(),
        "starting albumsync"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, &access_token))
}

async fn run(args: Args, access_token: &str) -> anyhow::Result<()> {
    let client = Arc::new(RestPhotosClient::new(access_token)?);

    let store = match args.state_file {
        Some(path) => StateStore::new(path),
        None => StateStore::at_default_location(),
    };
    tracing::debug!(state_file = %store.path().display(), "using state store");

    let mut config = UploaderConfig::default();
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }

    let runner = Runner::new(
        client,
        Arc::new(SystemClock),
        config,
        store,
        Arc::new(LogProgressSink),
    );

    // First Ctrl-C drains gracefully; the state is flushed before exit.
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight uploads");
            cancel.cancel();
        }
    });

    let report = runner.run(&args.root, !args.no_resume).await?;
    tracing::info!(
        albums = report.albums_bound,
        uploaded = report.files_uploaded,
        skipped = report.files_skipped,
        rejected = report.files_rejected,
        "all done"
    );
    Ok(())
}
