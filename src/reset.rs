//! Offset reset coordination between requesters and the sampling loop.
//!
//! The shared state is a single counter of reset commands still to send,
//! behind one mutex, plus one condition variable that wakes requesters.
//!
//! - [`ResetState::request_reset`] arms the counter to the configured
//!   command count and blocks until the sampling loop has drained it.
//! - Each sampling tick takes the lock through [`ResetState::begin_tick`].
//!   While the counter is positive the tick sends one `O` instead of
//!   sampling and calls [`TickGuard::complete_reset`].
//!
//! Concurrent requests re-arm: a new request always sets the counter back
//! to the full count, even if a sequence is already running. Every
//! requester therefore sees at least the full count of reset commands sent
//! after its own call, at the cost of lengthening a sequence in flight.
//! All waiting requesters return once the counter reaches zero.

use crate::config::ResetSettings;
use crate::error::{AppResult, DaqError};
use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reply to a completed reset request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetAck {
    /// Whether the full reset sequence was sent
    pub success: bool,
    /// Human-readable summary of how many resets went out
    pub message: String,
}

/// Shared reset counter, owned by whoever wires the sampling loop and
/// handed out by `Arc`.
#[derive(Debug)]
pub struct ResetState {
    pending: Mutex<u32>,
    drained: Condvar,
    command_count: u32,
    timeout: Option<Duration>,
}

impl ResetState {
    /// `command_count` resets per request; `timeout` bounds the wait of a
    /// requester, `None` waits for as long as it takes.
    pub fn new(command_count: u32, timeout: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(0),
            drained: Condvar::new(),
            command_count: command_count.max(1),
            timeout,
        }
    }

    /// Build from the `[reset]` configuration section.
    pub fn from_settings(settings: &ResetSettings) -> Self {
        Self::new(settings.command_count, settings.timeout())
    }

    /// Reset commands sent per request.
    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    // The counter is a plain integer that is never left half-updated, so a
    // panic elsewhere while holding the lock does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset commands still to be sent.
    pub fn pending(&self) -> u32 {
        *self.lock()
    }

    /// Whether a reset sequence is in progress.
    pub fn is_resetting(&self) -> bool {
        self.pending() > 0
    }

    /// Arm a reset sequence and wait until it has been sent
    ///
    /// # Errors
    /// [`DaqError::ResetTimeout`] if the configured timeout expires first.
    /// The sequence itself stays armed and completes once the sampling loop
    /// gets to it.
    pub fn request_reset(&self) -> AppResult<ResetAck> {
        let mut pending = self.lock();
        if *pending > 0 {
            debug!(pending = *pending, "Re-arming reset sequence already in progress");
        }
        *pending = self.command_count;

        let pending = match self.timeout {
            Some(timeout) => {
                let (guard, result) = self
                    .drained
                    .wait_timeout_while(pending, timeout, |p| *p > 0)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && *guard > 0 {
                    warn!(pending = *guard, ?timeout, "Offset reset timed out");
                    return Err(DaqError::ResetTimeout(timeout));
                }
                guard
            }
            None => self
                .drained
                .wait_while(pending, |p| *p > 0)
                .unwrap_or_else(PoisonError::into_inner),
        };
        drop(pending);

        info!(count = self.command_count, "Offset reset completed");
        Ok(ResetAck {
            success: true,
            message: format!(
                "Reset offset command was sent {} times to the sensor.",
                self.command_count
            ),
        })
    }

    /// Lock the state for one sampling tick.
    ///
    /// The lock is held until the guard drops; waiting requesters are woken
    /// after it is released if the tick sent a reset.
    pub fn begin_tick(&self) -> TickGuard<'_> {
        TickGuard {
            state: self,
            pending: Some(self.lock()),
            notify: false,
        }
    }
}

/// Exclusive access to the reset counter for the duration of one tick.
#[derive(Debug)]
pub struct TickGuard<'a> {
    state: &'a ResetState,
    pending: Option<MutexGuard<'a, u32>>,
    notify: bool,
}

impl TickGuard<'_> {
    /// Reset commands still to send; the tick must send one if positive.
    pub fn pending(&self) -> u32 {
        self.pending.as_deref().copied().unwrap_or(0)
    }

    /// Record that one reset command went out. Returns what is left.
    pub fn complete_reset(&mut self) -> u32 {
        let Some(pending) = self.pending.as_deref_mut() else {
            return 0;
        };
        *pending = pending.saturating_sub(1);
        self.notify = true;
        *pending
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        drop(self.pending.take());
        if self.notify {
            self.state.drained.notify_all();
        }
    }
}
