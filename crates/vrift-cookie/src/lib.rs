//! # vrift-cookie
//!
//! Cookie-file sync barrier for filesystem watchers.
//!
//! OS change notification is asynchronous: at any instant some events may
//! still be queued in the kernel or in the watcher. To answer "has the watcher
//! seen every change up to now?", [`CookieSync::sync`] writes a uniquely named
//! cookie file into every watched root and resolves once the watcher reports
//! each of them through [`CookieSync::notify_cookie`]. Events are delivered in
//! per-directory order, so seeing the cookie means every earlier change in
//! that directory was seen too.
//!
//! ## Cookie file names
//!
//! `<root>/<base><hostname>-<pid>-<serial>`, where `<base>` comes from
//! `[sync] cookie_prefix` and `<serial>` is a process-wide counter.
//!
//! ## Locking
//!
//! Two locks: the directory registry, and the pending cookie table. `sync`
//! holds the table lock while it writes cookie files so that a concurrent
//! `notify_cookie` can never look a path up before it is published. While
//! holding it, `sync` briefly reads the registry; nothing takes them in the
//! other order.

pub mod cookie;
pub mod dirs;
pub mod error;

pub use cookie::{Cookie, CookieFuture};
pub use dirs::CookieDirs;
pub use error::{Result, SyncError};

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::field::display;
use tracing::instrument;
use vrift_config::{log_sync_debug, log_sync_error, SyncConfig};

/// Serial shared by every `CookieSync` in the process; never reused.
static SERIAL: AtomicU64 = AtomicU64::new(0);

type CookieMap = HashMap<PathBuf, Arc<Cookie>>;

/// Cookie prefix for this process: `<base><hostname>-<pid>-`
pub fn process_cookie_prefix(base: &str) -> String {
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}{}-{}-", base, hostname, std::process::id())
}

/// Sync barrier over a set of watched directories
#[derive(Debug)]
pub struct CookieSync {
    dirs: CookieDirs,
    cookies: RwLock<CookieMap>,
    default_timeout: Duration,
}

impl CookieSync {
    /// Create a session for `dir` using the global `[sync]` config
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let sync = vrift_config::config().sync.clone();
        Self::with_config(dir, &sync)
    }

    pub fn with_config(dir: impl Into<PathBuf>, config: &SyncConfig) -> Self {
        Self {
            dirs: CookieDirs::new(process_cookie_prefix(&config.cookie_prefix), dir),
            cookies: RwLock::new(HashMap::new()),
            default_timeout: config.default_timeout(),
        }
    }

    fn table(&self) -> RwLockReadGuard<'_, CookieMap> {
        self.cookies.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, CookieMap> {
        self.cookies.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Directory registry
    // ------------------------------------------------------------------

    pub fn add_directory(&self, dir: impl Into<PathBuf>) {
        self.dirs.add(dir);
    }

    /// Stop placing cookies in `dir`.
    ///
    /// Cookies already pending under `dir` can never be observed any more and
    /// are treated as serviced.
    pub fn remove_directory(&self, dir: &Path) {
        self.dirs.remove(dir);
        self.cancel_under(&[dir.to_path_buf()]);
    }

    /// Make `dir` the only cookie directory; pending cookies under every
    /// dropped directory are treated as serviced.
    pub fn replace_directories(&self, dir: impl Into<PathBuf>) {
        let dropped = self.dirs.replace(dir);
        if !dropped.is_empty() {
            self.cancel_under(&dropped);
        }
    }

    pub fn list_directories(&self) -> Vec<PathBuf> {
        self.dirs.list()
    }

    pub fn cookie_prefix(&self) -> String {
        self.dirs.prefix()
    }

    /// `dir/<prefix>` for every registered directory
    pub fn cookie_prefixes(&self) -> Vec<PathBuf> {
        self.dirs.cookie_prefixes()
    }

    pub fn is_cookie_path(&self, path: &Path) -> bool {
        self.dirs.is_cookie_path(path)
    }

    pub fn is_registered_directory(&self, path: &Path) -> bool {
        self.dirs.is_registered(path)
    }

    fn cancel_under(&self, dirs: &[PathBuf]) {
        let cancelled: Vec<(PathBuf, Arc<Cookie>)> = {
            let mut map = self.table_mut();
            let paths: Vec<PathBuf> = map
                .keys()
                .filter(|p| dirs.iter().any(|d| p.starts_with(d)))
                .cloned()
                .collect();
            paths
                .into_iter()
                .filter_map(|p| map.remove(&p).map(|c| (p, c)))
                .collect()
        };

        for (path, cookie) in cancelled {
            log_sync_debug!(
                "Cancelling cookie in removed directory",
                path = display(path.display()),
            );
            cookie.notify();
        }
    }

    // ------------------------------------------------------------------
    // Barrier
    // ------------------------------------------------------------------

    /// Place a cookie in every registered directory.
    ///
    /// Directories whose cookie cannot be created are skipped; the call only
    /// fails if none could be created.
    #[instrument(level = "debug", skip(self))]
    pub fn sync(&self) -> Result<CookieFuture> {
        let prefixes = self.dirs.cookie_prefixes();
        if prefixes.is_empty() {
            return Err(SyncError::NoDirectories);
        }
        let serial = SERIAL.fetch_add(1, Ordering::Relaxed);

        let (cookie, future) = Cookie::new(prefixes.len());
        let cookie = Arc::new(cookie);

        // Held until the new entries are published: the watcher may see a
        // cookie file the moment it exists, and notify_cookie must find it.
        let mut map = self.table_mut();

        let mut pending = Vec::with_capacity(prefixes.len());
        let mut last_error: Option<(PathBuf, io::Error)> = None;

        for prefix in &prefixes {
            // A directory removed since the snapshot has already run its
            // cancellation; a cookie published there would never resolve.
            let registered = prefix.parent().is_some_and(|d| self.dirs.is_registered(d));
            if !registered {
                cookie.forfeit();
                continue;
            }

            let path = dirs::cookie_path(prefix, serial);

            let created = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o700)
                .open(&path);

            match created {
                Ok(_) => {
                    log_sync_debug!("sync created cookie file", path = display(path.display()));
                    pending.push(path);
                }
                Err(e) => {
                    log_sync_error!(
                        "sync cookie couldn't be created",
                        path = display(path.display()),
                        error = display(&e),
                    );
                    cookie.forfeit();
                    last_error = Some((path, e));
                }
            }
        }

        if pending.is_empty() {
            return Err(match last_error {
                Some((path, source)) => SyncError::FileCreation { path, source },
                None => SyncError::NoDirectories,
            });
        }

        map.extend(pending.into_iter().map(|p| (p, cookie.clone())));
        Ok(future)
    }

    /// Block until the watcher has observed everything up to now.
    ///
    /// A sync aborted by a recrawl is retried with a fresh cookie while the
    /// deadline allows; a timeout is final.
    pub fn sync_to_now(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut remaining = timeout;

        loop {
            match self.sync()?.wait_timeout(remaining) {
                Ok(()) => return Ok(()),
                Err(SyncError::Aborted) => {
                    remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SyncError::Aborted);
                    }
                    log_sync_debug!(
                        "syncToNow: cookie aborted, retrying",
                        remaining_ms = remaining.as_millis() as u64,
                    );
                }
                Err(e @ SyncError::Timeout { .. }) => {
                    log_sync_error!("syncToNow timed out", error = display(&e));
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `sync_to_now` with the configured default timeout
    pub fn sync_to_now_default(&self) -> Result<()> {
        self.sync_to_now(self.default_timeout)
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Report that the watcher observed `path`.
    ///
    /// Safe to call for every observed path; anything that is not a pending
    /// cookie is ignored.
    pub fn notify_cookie(&self, path: &Path) {
        let cookie = {
            let mut map = self.table_mut();
            let cookie = map.remove(path);
            log_sync_debug!(
                "cookie lookup",
                path = display(path.display()),
                pending = cookie.is_some(),
            );
            cookie
        };

        if let Some(cookie) = cookie {
            cookie.notify();
            // Best effort: the watcher side may have removed it already.
            let _ = std::fs::remove_file(path);
        }
    }

    /// Fail every outstanding cookie.
    ///
    /// Used on teardown and when the watcher has to recrawl, since event
    /// ordering can no longer be trusted.
    pub fn abort_all(&self) {
        let cookies = std::mem::take(&mut *self.table_mut());

        for (path, cookie) in cookies {
            if cookie.abort() {
                log_sync_error!(
                    "syncToNow: aborting cookie",
                    path = display(path.display()),
                );
            }
        }
    }

    /// Snapshot of cookie paths still waiting to be observed
    pub fn list_outstanding_cookie_paths(&self) -> Vec<PathBuf> {
        self.table().keys().cloned().collect()
    }
}

impl Drop for CookieSync {
    fn drop(&mut self) {
        // Wake up anyone still waiting on us
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrift_config::testing::TestEnvironment;

    fn session(env: &TestEnvironment) -> CookieSync {
        let sync = CookieSync::with_config(env.root(), &env.sync_config());
        for root in &env.roots[1..] {
            sync.add_directory(root);
        }
        sync
    }

    #[test]
    fn test_prefix_embeds_host_and_pid() {
        let prefix = process_cookie_prefix(".x-");
        assert!(prefix.starts_with(".x-"));
        assert!(prefix.ends_with(&format!("-{}-", std::process::id())));
    }

    #[test]
    fn test_sync_creates_one_cookie_per_directory() {
        let env = TestEnvironment::with_roots(2).unwrap();
        let sync = session(&env);

        let _fut = sync.sync().unwrap();
        let outstanding = sync.list_outstanding_cookie_paths();
        assert_eq!(outstanding.len(), 2);
        for path in &outstanding {
            assert!(path.exists());
            assert!(sync.is_cookie_path(path));
        }
    }

    #[test]
    fn test_notify_unknown_path_is_ignored() {
        let env = TestEnvironment::new().unwrap();
        let sync = session(&env);
        let fut = sync.sync().unwrap();

        let stray = env.create_file("main.rs", b"").unwrap();
        sync.notify_cookie(&stray);
        assert!(stray.exists());
        assert!(!fut.is_ready());
        assert_eq!(sync.list_outstanding_cookie_paths().len(), 1);
    }

    #[test]
    fn test_notify_removes_cookie_file() {
        let env = TestEnvironment::new().unwrap();
        let sync = session(&env);
        let fut = sync.sync().unwrap();

        let path = sync.list_outstanding_cookie_paths().remove(0);
        sync.notify_cookie(&path);
        assert!(!path.exists());
        assert!(fut.wait().is_ok());
    }

    #[test]
    fn test_empty_registry_is_an_error() {
        let env = TestEnvironment::new().unwrap();
        let sync = session(&env);
        sync.remove_directory(env.root());
        assert!(matches!(sync.sync(), Err(SyncError::NoDirectories)));
    }

    #[test]
    fn test_replace_directories_cancels_dropped() {
        let env = TestEnvironment::with_roots(2).unwrap();
        let sync = session(&env);
        let fut = sync.sync().unwrap();

        sync.replace_directories(&env.roots[1]);
        assert_eq!(sync.list_directories(), vec![env.roots[1].clone()]);
        let outstanding = sync.list_outstanding_cookie_paths();
        assert_eq!(outstanding.len(), 1);
        assert!(outstanding[0].starts_with(&env.roots[1]));

        sync.notify_cookie(&outstanding[0]);
        assert!(fut.wait().is_ok());
    }

    #[test]
    fn test_drop_aborts_outstanding() {
        let env = TestEnvironment::new().unwrap();
        let sync = session(&env);
        let fut = sync.sync().unwrap();
        drop(sync);
        assert!(fut.wait().unwrap_err().is_aborted());
    }
}
