//! MediaButler daemon.
//!
//! Loads configuration, wires the core pipeline, and runs until SIGINT or
//! SIGTERM. The HTTP adapter and push transport attach to the pipeline's
//! handles; this binary is the composition root they share.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mediabutler_core::classify::UnknownClassifier;
use mediabutler_core::Pipeline;

#[derive(Debug, Parser)]
#[command(name = "mediabutlerd", about = "MediaButler file-organization daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/mediabutler/config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    let args = Args::parse();
    let config = mediabutler_config::load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check_config {
        println!("configuration OK");
        return Ok(());
    }

    info!(
        library_root = %config.paths.library_root.display(),
        watch_folders = config.paths.watch_folders.len(),
        workers = config.retries.worker_count,
        "starting mediabutlerd"
    );

    // The embedding classifier is loaded by its own adapter crate; without
    // one the pipeline still runs and every file needs a manual category.
    let classifier = Arc::new(UnknownClassifier);

    let pipeline = Pipeline::start(&config, classifier, true)
        .await
        .context("starting pipeline")?;

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received");
    pipeline.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("installing SIGINT handler")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
