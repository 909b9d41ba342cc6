//! Shared run-level signals: the rate-limit cooldown and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Cooldown shared by the dispatcher and every worker.
///
/// A rate-limited response closes the gate until the indicated instant.
/// Closing while already closed keeps the later deadline.
#[derive(Debug, Clone, Default)]
pub struct RateGate {
    reopens_at: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for `cooldown` from now
    pub fn close_for(&self, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        let mut guard = self
            .reopens_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none_or(|current| current < until) {
            *guard = Some(until);
        }
        log::warn!("Rate limit hit; pausing dispatch for {cooldown:?}");
    }

    /// Time left until the gate reopens, `None` if open
    pub fn remaining(&self) -> Option<Duration> {
        let mut guard = self
            .reopens_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(until) => {
                let now = Instant::now();
                if until > now {
                    Some(until - now)
                } else {
                    *guard = None;
                    None
                }
            }
            None => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.remaining().is_none()
    }

    /// Block the calling thread until the gate is open
    pub fn wait(&self) {
        while let Some(left) = self.remaining() {
            thread::sleep(left);
        }
    }
}

/// Run-level cancel signal.
///
/// Cancelling stops new dispatch. Actions already running are allowed to
/// finish; nothing is rolled back automatically.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::info!("Cancellation requested; no new actions will be dispatched");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
