//! A single sync barrier and the caller's handle on its outcome.
//!
//! One `Cookie` is shared (via `Arc`) by every pending table entry of a sync.
//! Each share is released exactly once, by observation, cancellation or
//! abort. The release that takes `remaining` from 1 to 0 sends the outcome;
//! no other release can, so the outcome is delivered at most once.

use std::cell::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{Result, SyncError};

/// In-memory record of one barrier
#[derive(Debug)]
pub struct Cookie {
    remaining: AtomicUsize,
    completion: Sender<Result<()>>,
}

impl Cookie {
    /// Create a barrier spanning `shares` directories
    pub fn new(shares: usize) -> (Self, CookieFuture) {
        let (tx, rx) = bounded(1);
        let cookie = Self {
            remaining: AtomicUsize::new(shares),
            completion: tx,
        };
        let future = CookieFuture {
            rx,
            outcome: OnceCell::new(),
        };
        (cookie, future)
    }

    /// Number of shares not yet observed, cancelled, or aborted
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Release one share as observed. Fulfils the barrier on the last share.
    pub fn notify(&self) -> bool {
        self.release(Ok(()))
    }

    /// Release one share as aborted. Fails the barrier on the last share.
    pub fn abort(&self) -> bool {
        self.release(Err(SyncError::Aborted))
    }

    /// Drop a share whose cookie file was never created.
    ///
    /// Only valid before the cookie is published; never completes the barrier.
    pub(crate) fn forfeit(&self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns true if this call completed the barrier.
    fn release(&self, outcome: Result<()>) -> bool {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Receiver may already be gone (caller timed out); nothing to do then.
            let _ = self.completion.try_send(outcome);
            true
        } else {
            false
        }
    }
}

/// Caller's handle on a sync barrier.
///
/// Resolves to `Ok(())` once every share was observed, or to
/// `Err(SyncError::Aborted)` if the barrier was force-failed.
///
/// A disconnected sender means every share was dropped unobserved, which
/// reads as aborted everywhere.
#[derive(Debug)]
pub struct CookieFuture {
    rx: Receiver<Result<()>>,
    /// Outcome received by `is_ready` but not yet taken
    outcome: OnceCell<Result<()>>,
}

impl CookieFuture {
    fn poll(&self) -> bool {
        if self.outcome.get().is_some() {
            return true;
        }
        let outcome = match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => Err(SyncError::Aborted),
        };
        let _ = self.outcome.set(outcome);
        true
    }

    /// True once an outcome is available
    pub fn is_ready(&self) -> bool {
        self.poll()
    }

    /// Take the outcome if it is already available
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        if self.poll() {
            self.outcome.take()
        } else {
            None
        }
    }

    /// Block until the barrier completes
    pub fn wait(self) -> Result<()> {
        if let Some(outcome) = self.outcome.into_inner() {
            return outcome;
        }
        self.rx.recv().unwrap_or(Err(SyncError::Aborted))
    }

    /// Block until the barrier completes or `timeout` elapses
    pub fn wait_timeout(self, timeout: Duration) -> Result<()> {
        if let Some(outcome) = self.outcome.into_inner() {
            return outcome;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Aborted),
        }
    }
}
