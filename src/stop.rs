//! Cooperative shutdown signal shared by the worker threads
//!
//! Workers sleep on the token between ticks instead of calling
//! `thread::sleep`, so `stop` wakes them immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clonable stop flag with a timed wait
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    signal: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    /// Create a token that is not stopped
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiting worker
    pub fn stop(&self) {
        let (lock, cvar) = &*self.signal;
        let mut stopped = lock.lock();
        *stopped = true;
        cvar.notify_all();
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.signal.0.lock()
    }

    /// Sleep for `timeout` or until a stop is requested
    ///
    /// Returns `true` if the token is stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.signal;
        let mut stopped = lock.lock();

        // Spurious wakeups are possible, keep waiting until the deadline
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}
