use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by cookie sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Every cookie file of a sync failed to be created; carries the last failure
    #[error("sync: creat({path}) failed: {source}")]
    FileCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sync: no cookie directories registered")]
    NoDirectories,

    /// The barrier was force-failed by teardown or a recrawl
    #[error("sync: cookie was aborted before it was observed")]
    Aborted,

    #[error(
        "syncToNow: timed out waiting for cookie file to be observed by watcher within {} milliseconds",
        .timeout.as_millis()
    )]
    Timeout { timeout: Duration },
}

impl SyncError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, SyncError::Aborted)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }

    /// OS error code of a cookie creation failure
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SyncError::FileCreation { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
