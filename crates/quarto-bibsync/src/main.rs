//! bibsync binary - keeps BibTeX files and Quarto notes documents in sync

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarto_bibsync::config::DEFAULT_CONFIG_FILE;
use quarto_bibsync::fs_util::parent_dir;
use quarto_bibsync::{Config, FileWatcher, Reconciler, Side, SyncPair, run_watch_loop};

#[derive(Parser, Debug)]
#[command(name = "bibsync")]
#[command(about = "Keep BibTeX files and Quarto reading notes in sync")]
struct Args {
    /// Configuration file listing the pairs to sync
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Sync a single bib file given on the command line (requires --md)
    #[arg(long, requires = "md")]
    bib: Option<PathBuf>,

    /// Notes document of the single pair
    #[arg(long, requires = "bib")]
    md: Option<PathBuf>,

    /// Template for creating the document of the single pair
    #[arg(long, requires = "bib")]
    template: Option<PathBuf>,

    /// Synchronise once and exit instead of watching
    #[arg(long)]
    once: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let fallback = if args.verbose {
        "quarto_bibsync=debug,bibsync=debug"
    } else {
        "quarto_bibsync=info,bibsync=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let (config, base_dir) = match (args.bib, args.md) {
        (Some(bib), Some(md)) => (Config::single(bib, md, args.template), cwd),
        _ => {
            let path = cwd.join(&args.config);
            let config = Config::load(&path)?;
            (config, parent_dir(&path))
        }
    };
    let pairs = config.resolve(&base_dir)?;
    let options = &config.options;

    let mut synced = Vec::with_capacity(pairs.len());
    for resolved in pairs {
        let reconciler = Reconciler::new(options.reconcile.clone(), resolved.template);
        let mut pair = SyncPair::new(resolved.bib, resolved.doc, reconciler);
        let report = pair.bootstrap()?;
        for err in &report.errors {
            warn!(error = %err, "Malformed record left untouched");
        }
        synced.push(pair);
    }

    if args.once {
        info!(pairs = synced.len(), "Synchronised, exiting");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let mut tasks = Vec::with_capacity(synced.len());
    for pair in synced {
        let watcher = FileWatcher::new(
            pair.path(Side::Bib),
            pair.path(Side::Doc),
            options.watch_config(),
        )?;
        tasks.push(tokio::spawn(run_watch_loop(
            pair,
            watcher,
            options.loop_timing(),
            cancel.clone(),
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    cancel.cancel();

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Watch loop ended with an error"),
            Err(e) => error!(error = %e, "Watch loop task panicked"),
        }
    }
    Ok(())
}
