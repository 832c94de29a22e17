//! vrift-watchd - Filesystem watch daemon with cookie sync
//!
//! Usage:
//!   vrift-watchd [--timeout-ms N] [--once] ROOT...

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use vrift_config::logging::{init_logging, LogLevel};
use vrift_watchd::{run_daemon, DaemonConfig};

/// Watch directories and report when the watcher has caught up with them
#[derive(Parser)]
#[command(name = "vrift-watchd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directories to watch; cookies are placed directly in each
    #[arg(value_name = "ROOT", required = true)]
    roots: Vec<PathBuf>,

    /// Deadline for the startup sync (defaults to [sync] default_timeout_ms)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Exit after the startup sync instead of watching until Ctrl-C
    #[arg(long)]
    once: bool,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, env = "VRIFT_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_deref() {
        Some(s) => LogLevel::parse(s).with_context(|| format!("Unknown log level: {}", s))?,
        None => vrift_config::config().log.level,
    };
    init_logging(level);

    let mut roots = Vec::with_capacity(cli.roots.len());
    for root in &cli.roots {
        if !root.is_dir() {
            anyhow::bail!("Root is not a directory: {}", root.display());
        }
        // Watch events carry canonical paths; cookie lookups must match them
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize {}", root.display()))?;
        roots.push(root);
    }

    info!(roots = ?roots, "Starting vrift-watchd");

    let mut config = DaemonConfig::from_roots(roots);
    if let Some(ms) = cli.timeout_ms {
        config.sync_timeout = Duration::from_millis(ms);
    }
    config.once = cli.once;

    run_daemon(config).await
}
