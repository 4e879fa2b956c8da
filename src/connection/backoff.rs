//! Reconnection backoff.
//!
//! Pure exponential backoff with a hard attempt ceiling:
//! `delay = min(base * 2^(attempt-1), cap)`, plus optional jitter.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY};

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Automatic attempts before giving up.
    pub max_attempts: u32,
    /// Upper bound of random jitter added to each delay (zero disables it).
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given 1-based attempt, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay for the given attempt with jitter applied.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
    }
}

/// Bookkeeping for automatic reconnection.
#[derive(Debug, Default)]
pub(crate) struct ReconnectionState {
    /// Automatic attempts since the last successful connection.
    pub(crate) attempts: u32,
    /// When the most recent failure happened.
    pub(crate) last_failure: Option<Instant>,
    /// Pending retry timer.
    pub(crate) retry: Option<JoinHandle<()>>,
}

impl ReconnectionState {
    /// Forget all failures after a successful connection.
    ///
    /// Detaches rather than aborts the retry handle: a successful retry runs
    /// inside the very task that handle points at.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
        self.retry = None;
    }

    /// Record a newly scheduled retry timer.
    ///
    /// The previous handle is detached, not aborted. It is either finished
    /// or is the retry task currently rescheduling itself.
    pub(crate) fn schedule(&mut self, handle: JoinHandle<()>) {
        self.retry = Some(handle);
    }

    /// Abort the pending retry timer, if any.
    pub(crate) fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
    }

    /// Returns `true` while a retry timer is scheduled and has not fired.
    pub(crate) fn retry_pending(&self) -> bool {
        self.retry.as_ref().is_some_and(|h| !h.is_finished())
    }
}
