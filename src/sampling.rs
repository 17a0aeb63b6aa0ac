//! Steady-state acquisition loop.
//!
//! Every tick takes the reset lock first. If reset commands are pending the
//! tick sends one `O` and nothing else; otherwise it requests a sample,
//! reads the 27-byte reply, calibrates it and hands it to the frame sink.
//! The lock is held for the whole exchange, which also serializes access to
//! the half-duplex link.
//!
//! Nothing that happens inside a tick stops the loop. I/O failures cost the
//! tick its frame, a malformed reply is published as a neutral (all-zero)
//! frame, and the loop only exits when the shutdown flag is raised.
//!
//! A reply that missed its read can still arrive later. After any failed
//! read the next sampling tick drains the link before its request, so a
//! late reply is never published as the current reading.

use crate::adapters::ByteChannel;
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::instrument::codec::{decode_sample, Command, RawSample, DATA_LENGTH};
use crate::instrument::serial_helper::{drain, read_exact, send_command};
use crate::measurement::{CalibratedFrame, CalibrationVector, FrameSink};
use crate::reset::ResetState;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One reset command was sent; `remaining` are still pending
    ResetSent {
        /// Reset commands still to send
        remaining: u32,
    },
    /// A frame with this sequence number reached the sink
    Frame {
        /// Sequence number of the published frame
        sequence: u64,
    },
    /// The tick failed and produced nothing
    NoFrame,
}

/// Fixed-rate scheduler that sleeps to absolute deadlines, so time spent
/// inside a tick does not accumulate as drift.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// Start a schedule whose first deadline is one period from now.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Sleep until the next tick boundary.
    ///
    /// After an overrun of more than a whole period the schedule restarts
    /// from now instead of firing the missed ticks back to back.
    pub fn wait(&mut self) {
        self.next += self.period;
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else if now - self.next > self.period {
            self.next = now;
        }
    }
}

/// Drives the sensor once the handshake is done.
pub struct SamplingLoop<C, S> {
    channel: C,
    sink: S,
    reset: Arc<ResetState>,
    calibration: CalibrationVector,
    frame_id: String,
    period: Duration,
    retry: RetryPolicy,
    drain_chunk: usize,
    drain_max_iterations: u32,
    sequence: u64,
    resync: bool,
}

impl<C: ByteChannel, S: FrameSink> SamplingLoop<C, S> {
    /// Wire a loop to its channel, sink and reset state. Rate, frame id and
    /// read limits come from `settings`, which must have passed validation.
    pub fn new(
        channel: C,
        sink: S,
        reset: Arc<ResetState>,
        calibration: CalibrationVector,
        settings: &Settings,
    ) -> Self {
        Self {
            channel,
            sink,
            reset,
            calibration,
            frame_id: settings.device.frame_id.clone(),
            period: settings.device.period(),
            retry: RetryPolicy::from(&settings.retry),
            drain_chunk: settings.retry.drain_chunk,
            drain_max_iterations: settings.retry.drain_max_iterations,
            sequence: 0,
            resync: false,
        }
    }

    /// Sequence number the next published frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickOutcome {
        let reset = Arc::clone(&self.reset);
        let mut guard = reset.begin_tick();

        if guard.pending() > 0 {
            return match send_command(&mut self.channel, &Command::ResetOffset) {
                Ok(()) => {
                    let remaining = guard.complete_reset();
                    debug!(remaining, "Sent offset reset command");
                    TickOutcome::ResetSent { remaining }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to send offset reset command");
                    TickOutcome::NoFrame
                }
            };
        }

        match self.sample() {
            Ok(frame) => {
                let sequence = frame.sequence;
                self.sink.publish(frame);
                TickOutcome::Frame { sequence }
            }
            Err(e) => {
                warn!(error = %e, "No frame this tick");
                if matches!(e, DaqError::ShortRead { .. } | DaqError::Io(_)) {
                    // the reply, or the rest of it, may still be on its way
                    self.resync = true;
                }
                TickOutcome::NoFrame
            }
        }
    }

    fn sample(&mut self) -> AppResult<CalibratedFrame> {
        if self.resync {
            let discarded = drain(&mut self.channel, self.drain_chunk, self.drain_max_iterations);
            if discarded > 0 {
                debug!(discarded, "Discarded late replies");
            }
            self.resync = false;
        }

        send_command(&mut self.channel, &Command::RequestSample)?;
        let reply = read_exact(&mut self.channel, DATA_LENGTH, &self.retry)?;

        let raw = decode_sample(&reply).unwrap_or_else(|e| {
            warn!(error = %e, "Publishing neutral frame for malformed reply");
            RawSample::neutral()
        });

        let frame = CalibratedFrame::from_values(
            self.frame_id.as_str(),
            Utc::now(),
            self.sequence,
            self.calibration.apply(&raw),
        );
        self.sequence += 1;
        Ok(frame)
    }

    /// Tick at the configured rate until `shutdown` is raised. Returns the
    /// number of ticks run.
    pub fn run(&mut self, shutdown: &AtomicBool) -> u64 {
        info!(
            period_ms = self.period.as_secs_f64() * 1000.0,
            frame_id = %self.frame_id,
            "Sampling loop started"
        );

        let mut ticker = Ticker::new(self.period);
        let mut ticks = 0u64;
        while !shutdown.load(Ordering::Relaxed) {
            self.tick();
            ticks += 1;
            ticker.wait();
        }

        info!(ticks, frames = self.sequence, "Sampling loop stopped");
        ticks
    }
}
