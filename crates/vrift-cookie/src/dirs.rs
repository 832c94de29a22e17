//! Directories eligible to receive cookie files.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Inner {
    prefix: String,
    dirs: HashSet<PathBuf>,
}

/// Registry of cookie directories and the shared cookie file name prefix.
///
/// The prefix is fixed at construction. The directory set and the prefix sit
/// behind one lock, which is never held together with the pending cookie table.
#[derive(Debug)]
pub struct CookieDirs {
    inner: RwLock<Inner>,
}

impl CookieDirs {
    pub fn new(prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(dir.into());
        Self {
            inner: RwLock::new(Inner {
                prefix: prefix.into(),
                dirs,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn prefix(&self) -> String {
        self.read().prefix.clone()
    }

    /// Returns false if the directory was already registered
    pub fn add(&self, dir: impl Into<PathBuf>) -> bool {
        self.write().dirs.insert(dir.into())
    }

    /// Returns false if the directory was not registered
    pub fn remove(&self, dir: &Path) -> bool {
        self.write().dirs.remove(dir)
    }

    /// Make `dir` the only registered directory; returns the ones dropped
    pub fn replace(&self, dir: impl Into<PathBuf>) -> Vec<PathBuf> {
        let dir = dir.into();
        let mut inner = self.write();
        let dropped = inner.dirs.drain().filter(|d| *d != dir).collect();
        inner.dirs.insert(dir);
        dropped
    }

    pub fn list(&self) -> Vec<PathBuf> {
        self.read().dirs.iter().cloned().collect()
    }

    /// `dir/<prefix>` for every registered directory
    pub fn cookie_prefixes(&self) -> Vec<PathBuf> {
        let inner = self.read();
        inner.dirs.iter().map(|dir| dir.join(&inner.prefix)).collect()
    }

    /// True if `path` sits directly in a registered directory and its file
    /// name carries the cookie prefix
    pub fn is_cookie_path(&self, path: &Path) -> bool {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        let inner = self.read();
        inner.dirs.contains(parent) && name.to_string_lossy().starts_with(&inner.prefix)
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.read().dirs.contains(path)
    }
}

/// Append `serial` to a directory-qualified cookie prefix
pub fn cookie_path(prefix: &Path, serial: u64) -> PathBuf {
    let mut s = OsString::from(prefix.as_os_str());
    s.push(serial.to_string());
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registers_initial_dir() {
        let dirs = CookieDirs::new(".c-", "/w/a");
        assert_eq!(dirs.list(), vec![PathBuf::from("/w/a")]);
        assert!(dirs.is_registered(Path::new("/w/a")));
        assert!(!dirs.is_registered(Path::new("/w")));
        assert_eq!(dirs.prefix(), ".c-");
    }

    #[test]
    fn test_add_remove() {
        let dirs = CookieDirs::new(".c-", "/w/a");
        assert!(dirs.add("/w/b"));
        assert!(!dirs.add("/w/b"));
        assert_eq!(dirs.list().len(), 2);
        assert!(dirs.remove(Path::new("/w/a")));
        assert!(!dirs.remove(Path::new("/w/a")));
        assert_eq!(dirs.list(), vec![PathBuf::from("/w/b")]);
    }

    #[test]
    fn test_replace_keeps_exactly_one() {
        let dirs = CookieDirs::new(".c-", "/w/a");
        dirs.add("/w/b");
        let mut dropped = dirs.replace("/w/b");
        dropped.sort();
        assert_eq!(dropped, vec![PathBuf::from("/w/a")]);
        assert_eq!(dirs.list(), vec![PathBuf::from("/w/b")]);
    }

    #[test]
    fn test_cookie_prefixes() {
        let dirs = CookieDirs::new(".c-host-1-", "/w/a");
        dirs.add("/w/b");
        let mut prefixes = dirs.cookie_prefixes();
        prefixes.sort();
        assert_eq!(
            prefixes,
            vec![
                PathBuf::from("/w/a/.c-host-1-"),
                PathBuf::from("/w/b/.c-host-1-")
            ]
        );
        assert_eq!(
            cookie_path(&prefixes[0], 42),
            PathBuf::from("/w/a/.c-host-1-42")
        );
    }

    #[test]
    fn test_is_cookie_path() {
        let dirs = CookieDirs::new(".c-host-1-", "/w/a");
        assert!(dirs.is_cookie_path(Path::new("/w/a/.c-host-1-7")));
        // Not directly inside a registered dir
        assert!(!dirs.is_cookie_path(Path::new("/w/a/sub/.c-host-1-7")));
        // Wrong prefix
        assert!(!dirs.is_cookie_path(Path::new("/w/a/main.rs")));
        // Unregistered dir
        assert!(!dirs.is_cookie_path(Path::new("/w/b/.c-host-1-7")));
        assert!(!dirs.is_cookie_path(Path::new("/")));
    }
}
