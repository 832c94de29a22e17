//! FS Watch feeding the cookie sync barrier
//!
//! Watches every cookie root and routes what it sees:
//! - cookie files go to `CookieSync::notify_cookie`
//! - rescans (kernel queue overflow, FSEvents history loss) abort outstanding cookies
//! - removal of a root itself removes it from the cookie registry
//! - everything else is a real change and is handed to the caller
//!
//! Uses FSEvents on macOS, inotify on Linux.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::field::display;
use tracing::{debug, warn};
use vrift_config::{log_watch_debug, log_watch_info, log_watch_warn, SyncConfig, WatchConfig};
use vrift_cookie::CookieSync;

use crate::ignore::IgnoreMatcher;

/// Result of classifying one path of a notify event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A cookie file became visible
    Cookie { path: PathBuf },
    /// Event ordering was lost; the watcher must recrawl
    Recrawl,
    /// A watched root itself went away
    RootRemoved { path: PathBuf },
    /// File or directory created or modified
    Changed { path: PathBuf },
    /// File or directory removed
    Removed { path: PathBuf },
}

impl WatchEvent {
    /// Real changes are reported to the caller; the rest is handled internally
    pub fn is_change(&self) -> bool {
        matches!(self, WatchEvent::Changed { .. } | WatchEvent::Removed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("no roots to watch")]
    NoRoots,
}

/// Classify a notify event against the cookie registry
pub fn classify(sync: &CookieSync, ignore: &IgnoreMatcher, event: Event) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![WatchEvent::Recrawl];
    }

    let mut events = Vec::new();

    for path in event.paths {
        let watch_event = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                if sync.is_cookie_path(&path) {
                    WatchEvent::Cookie { path }
                } else if ignore.should_ignore(&path) {
                    continue;
                } else {
                    WatchEvent::Changed { path }
                }
            }
            EventKind::Remove(_) => {
                if sync.is_registered_directory(&path) {
                    WatchEvent::RootRemoved { path }
                } else if sync.is_cookie_path(&path) || ignore.should_ignore(&path) {
                    // Cookie deletions are our own cleanup
                    continue;
                } else {
                    WatchEvent::Removed { path }
                }
            }
            _ => continue,
        };

        events.push(watch_event);
    }

    events
}

/// Apply the cookie-related side of an event. Returns true for real changes.
pub fn dispatch(sync: &CookieSync, event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Cookie { path } => {
            sync.notify_cookie(path);
            false
        }
        WatchEvent::Recrawl => {
            log_watch_warn!("Recrawl required, aborting outstanding cookies");
            sync.abort_all();
            false
        }
        WatchEvent::RootRemoved { path } => {
            log_watch_warn!("Watched root removed", root = display(path.display()));
            sync.remove_directory(path);
            false
        }
        WatchEvent::Changed { .. } | WatchEvent::Removed { .. } => true,
    }
}

/// FS watcher bound to a cookie sync session
pub struct CookieWatch {
    sync: Arc<CookieSync>,
    ignore: IgnoreMatcher,
    watcher: RecommendedWatcher,
    event_rx: Receiver<Result<Event, notify::Error>>,
}

impl CookieWatch {
    /// Watch `roots`, placing cookies in each of them
    pub fn new(
        roots: &[PathBuf],
        watch_config: &WatchConfig,
        sync_config: &SyncConfig,
    ) -> Result<Self, WatchError> {
        let (first, rest) = roots.split_first().ok_or(WatchError::NoRoots)?;

        let (tx, rx) = mpsc::channel();

        let notify_config = Config::default()
            .with_poll_interval(Duration::from_millis(watch_config.poll_interval_ms))
            .with_compare_contents(false);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify_config,
        )?;

        // Watch before the root is registered so no cookie lands unwatched
        watcher.watch(first, RecursiveMode::Recursive)?;
        log_watch_info!("FS Watch started", root = display(first.display()));

        let mut watch = Self {
            sync: Arc::new(CookieSync::with_config(first, sync_config)),
            ignore: IgnoreMatcher::from_config(watch_config),
            watcher,
            event_rx: rx,
        };

        for root in rest {
            watch.add_root(root)?;
        }

        Ok(watch)
    }

    /// Shared handle on the sync session, for callers of `sync_to_now`
    pub fn sync(&self) -> &Arc<CookieSync> {
        &self.sync
    }

    pub fn add_root(&mut self, root: &Path) -> Result<(), WatchError> {
        self.watcher.watch(root, RecursiveMode::Recursive)?;
        self.sync.add_directory(root);
        log_watch_info!("Root added", root = display(root.display()));
        Ok(())
    }

    pub fn remove_root(&mut self, root: &Path) {
        self.sync.remove_directory(root);
        // The root may already be gone, in which case the backend dropped it
        if let Err(e) = self.watcher.unwatch(root) {
            debug!(root = %root.display(), error = %e, "unwatch failed");
        }
        log_watch_info!("Root removed", root = display(root.display()));
    }

    /// Drain pending events (non-blocking), handing real changes to `on_change`
    /// in delivery order.
    pub fn poll_with(&self, mut on_change: impl FnMut(WatchEvent)) {
        while let Ok(result) = self.event_rx.try_recv() {
            match result {
                Ok(event) => {
                    log_watch_debug!("FS event received", kind = display(format!("{:?}", event.kind)));
                    for watch_event in classify(&self.sync, &self.ignore, event) {
                        if dispatch(&self.sync, &watch_event) {
                            on_change(watch_event);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "FS watch error");
                }
            }
        }
    }

    /// Drain pending events (non-blocking)
    pub fn poll(&self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        self.poll_with(|event| events.push(event));
        events
    }
}

/// Spawn async watcher task that sends real changes to a channel
pub fn spawn_watch_task(
    watch: CookieWatch,
    tick: Duration,
    tx: tokio_mpsc::Sender<WatchEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            for event in watch.poll() {
                if tx.send(event).await.is_err() {
                    // Channel closed, exit
                    return;
                }
            }

            // Sleep briefly to avoid busy loop
            tokio::time::sleep(tick).await;
        }
    })
}
