//! # vrift-watchd
//!
//! Filesystem watch daemon for the Velo Rift cookie sync barrier.
//!
//! ## Architecture
//!
//! A `vrift-watchd` process:
//! - Watches one or more roots with notify (inotify / FSEvents)
//! - Feeds cookie observations, recrawls, and root removals into a
//!   [`vrift_cookie::CookieSync`] session
//! - Answers "has the watcher caught up?" with `sync_to_now`
//! - Logs the real changes it sees until shut down

pub mod ignore;
pub mod watch;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::field::display;
use tracing::info;
use vrift_config::{log_daemon_info, log_sync_error, log_sync_info, SyncConfig, WatchConfig};

use crate::watch::{CookieWatch, WatchEvent};

/// Runtime configuration for a watchd instance
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Canonical roots to watch
    pub roots: Vec<PathBuf>,
    /// Deadline for the startup `sync_to_now`
    pub sync_timeout: Duration,
    /// Exit after the startup sync instead of watching until Ctrl-C
    pub once: bool,
    pub sync: SyncConfig,
    pub watch: WatchConfig,
}

impl DaemonConfig {
    /// Build a config for `roots` from the global vrift config
    pub fn from_roots(roots: Vec<PathBuf>) -> Self {
        let global = vrift_config::config();
        Self {
            roots,
            sync_timeout: global.sync.default_timeout(),
            once: false,
            sync: global.sync.clone(),
            watch: global.watch.clone(),
        }
    }
}

/// Main daemon entry point
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    log_daemon_info!("Starting vrift-watchd", roots = config.roots.len() as u64);

    let watch = CookieWatch::new(&config.roots, &config.watch, &config.sync)
        .context("Failed to start FS watch")?;
    let sync = watch.sync().clone();
    info!(prefix = %sync.cookie_prefix(), "Cookie sync session ready");

    // Consumer first, so the watch task never blocks on a full channel at startup
    let (tx, mut rx) = mpsc::channel::<WatchEvent>(4096);
    let consumer_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(?event, "change");
        }
    });

    let watch_handle =
        watch::spawn_watch_task(watch, Duration::from_millis(config.watch.tick_ms), tx);

    let timeout = config.sync_timeout;
    let blocking_sync = sync.clone();
    let synced = tokio::task::spawn_blocking(move || blocking_sync.sync_to_now(timeout))
        .await
        .context("sync task panicked")?;

    match &synced {
        Ok(()) => log_sync_info!("Watcher caught up", timeout_ms = timeout.as_millis() as u64),
        Err(e) => log_sync_error!("Sync failed", error = display(e)),
    }

    if config.once {
        watch_handle.abort();
        consumer_handle.abort();
        sync.abort_all();
        return synced.context("sync_to_now failed");
    }

    tokio::select! {
        _ = watch_handle => {
            info!("Watch exited");
        }
        _ = consumer_handle => {
            info!("Consumer exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    // Wake anyone still blocked in sync_to_now
    let outstanding = sync.list_outstanding_cookie_paths().len();
    sync.abort_all();
    info!(
        outstanding = outstanding as u64,
        "Outstanding cookies aborted on shutdown"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_roots_uses_global_defaults() {
        let roots = vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")];
        let config = DaemonConfig::from_roots(roots.clone());
        assert_eq!(config.roots, roots);
        assert!(!config.once);
        assert_eq!(config.sync_timeout, config.sync.default_timeout());
    }
}
