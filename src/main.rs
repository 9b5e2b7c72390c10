//! Treecache - live directory tree cache
//!
//! Entry point for the `treecache` command: watches directories and logs
//! every cache transition until interrupted.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use treecache::cache::{content_hash, CacheEntry, CacheObserver, FileTreeRepository};
use treecache::error::CacheError;
use treecache::observability::init_tracing;
use treecache::Config;

/// Treecache - live directory tree cache
#[derive(Parser, Debug)]
#[command(name = "treecache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to watch
    #[arg(short, long, env = "TREECACHE_WATCH_DIRS", value_delimiter = ',')]
    watch: Vec<PathBuf>,

    /// Depth below each directory to cache (-1 caches only the directory itself)
    #[arg(short, long, env = "TREECACHE_MAX_DEPTH", allow_negative_numbers = true)]
    depth: Option<i32>,

    /// Follow symbolic links and watch their targets
    #[arg(long, env = "TREECACHE_FOLLOW_LINKS")]
    follow_links: Option<bool>,

    /// Rescan a directory on every change instead of only on overflow
    #[arg(long, env = "TREECACHE_RESCAN")]
    rescan: bool,

    /// Gitignore-style patterns to exclude
    #[arg(short, long, env = "TREECACHE_IGNORE", value_delimiter = ',')]
    ignore: Vec<String>,

    /// JSON configuration file; command-line values override it
    #[arg(short, long, env = "TREECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the file's
    /// level, then info
    #[arg(long, env = "TREECACHE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging output
    #[arg(long, env = "TREECACHE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    /// Layer command-line values over the file configuration.
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        config.log_json = config.log_json || self.log_json;
        if !self.watch.is_empty() {
            config.watch_dirs = self.watch;
        }
        if let Some(depth) = self.depth {
            config.max_depth = depth;
        }
        if let Some(follow_links) = self.follow_links {
            config.follow_links = follow_links;
        }
        config.rescan_on_update = config.rescan_on_update || self.rescan;
        config.ignore_patterns.extend(self.ignore);
        Ok(config)
    }
}

/// Logs every transition.
struct LoggingObserver;

impl CacheObserver<String> for LoggingObserver {
    fn on_create(&self, new: &CacheEntry<String>) {
        tracing::info!(path = %new.path().display(), hash = ?new.value().ok(), "Created");
    }

    fn on_update(&self, old: &CacheEntry<String>, new: &CacheEntry<String>) {
        let changed = old.value().ok() != new.value().ok();
        tracing::info!(path = %new.path().display(), changed, "Updated");
    }

    fn on_delete(&self, old: &CacheEntry<String>) {
        tracing::info!(path = %old.path().display(), "Deleted");
    }

    fn on_error(&self, error: &CacheError) {
        tracing::warn!(error = %error, "Cache error");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config()?;

    // Initialize tracing with configuration
    init_tracing(&config.log_level, config.log_json);

    tracing::info!(
        "Treecache v{} starting...",
        env!("CARGO_PKG_VERSION")
    );
    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    if config.watch_dirs.is_empty() {
        anyhow::bail!("no directories to watch; pass --watch or set watch_dirs");
    }

    let repository = FileTreeRepository::new(&config, Arc::new(content_hash))
        .context("starting file tree repository")?;
    repository.add_observer(Arc::new(LoggingObserver));

    for dir in &config.watch_dirs {
        let cached = repository.list(dir, config.max_depth, &|_| true).len();
        tracing::info!(path = %dir.display(), cached, "Directory cached");
    }

    shutdown_signal().await?;
    repository.close();
    tracing::info!("Treecache stopped");
    Ok(())
}

/// Wait for Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("installing Ctrl+C handler")?;
                tracing::info!("Received Ctrl+C, shutting down");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("installing Ctrl+C handler")?;
        tracing::info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
