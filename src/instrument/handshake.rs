//! One-shot startup exchange with the sensor
//!
//! Sequence:
//! 1. Drain anything left over on the link
//! 2. Optionally query the calibration factors (`p`, 46-byte reply), drain
//! 3. If the requested divider is one of 1/2/4/8, set it (`<n>F`), read it
//!    back (`0F`, 3-byte reply) and compare, drain
//! 4. Send one `R` to prime the device for steady-state sampling
//!
//! No step is fatal. A step that fails is logged and the driver carries on
//! with what it has; an uncalibrated start is surfaced as a warning.

use crate::adapters::ByteChannel;
use crate::config::Settings;
use crate::error::DaqError;
use crate::error_recovery::RetryPolicy;
use crate::instrument::codec::{
    check_divider_ack, decode_calibration, Command, FrequencyDivider, CALIBRATION_LENGTH,
    DIVIDER_ACK_LENGTH,
};
use crate::instrument::serial_helper::{drain, read_exact, send_command};
use crate::measurement::CalibrationVector;
use tracing::{error, info, warn};

/// Result of the divider negotiation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividerOutcome {
    /// The sensor echoed the requested divider
    Confirmed(FrequencyDivider),
    /// The sensor echoed a different divider; it keeps running with that one
    Mismatch {
        /// Divider that was sent
        requested: u8,
        /// Divider the sensor echoed
        reported: u8,
    },
    /// The requested value is not a supported divider, nothing was sent
    Skipped(u8),
    /// The divider was sent but the echo could not be read
    Unverified(FrequencyDivider),
}

/// What the handshake established.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReport {
    /// Factors to use for the whole session
    pub calibration: CalibrationVector,
    /// Whether the factors came from the sensor
    pub calibrated: bool,
    /// Divider negotiation result
    pub divider: DividerOutcome,
    /// Whether the priming sample request went out
    pub primed: bool,
    /// Bytes flushed from the link across all drains
    pub drained_bytes: usize,
}

/// Startup calibration and divider negotiation.
#[derive(Debug, Clone)]
pub struct CalibrationHandshake {
    acquire_calibration: bool,
    frequency_divider: u8,
    retry: RetryPolicy,
    drain_chunk: usize,
    drain_max_iterations: u32,
}

impl CalibrationHandshake {
    /// Create a handshake from explicit values, with default drain limits.
    pub fn new(acquire_calibration: bool, frequency_divider: u8, retry: RetryPolicy) -> Self {
        Self {
            acquire_calibration,
            frequency_divider,
            retry,
            drain_chunk: 255,
            drain_max_iterations: 16,
        }
    }

    /// Create a handshake from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            acquire_calibration: settings.device.acquire_calibration,
            frequency_divider: settings.device.frequency_divider,
            retry: RetryPolicy::from(&settings.retry),
            drain_chunk: settings.retry.drain_chunk,
            drain_max_iterations: settings.retry.drain_max_iterations,
        }
    }

    /// Run the handshake. Never fails; see [`HandshakeReport`].
    pub fn run<C: ByteChannel + ?Sized>(&self, channel: &mut C) -> HandshakeReport {
        let mut drained_bytes = self.drain(channel);

        let (calibration, calibrated) = if self.acquire_calibration {
            let result = self.query_calibration(channel);
            drained_bytes += self.drain(channel);
            match result {
                Ok(calibration) => {
                    let f = calibration.factors();
                    info!(
                        "Calibration from sensor: {:.3} LSB/N, {:.3} LSB/N, {:.3} LSB/N, {:.3} LSB/Nm, {:.3} LSB/Nm, {:.3} LSB/Nm",
                        f[0], f[1], f[2], f[3], f[4], f[5]
                    );
                    (calibration, true)
                }
                Err(e) => {
                    warn!(error = %e, "Calibration query failed");
                    (CalibrationVector::default(), false)
                }
            }
        } else {
            (CalibrationVector::default(), false)
        };

        if !calibrated {
            warn!("Publishing uncalibrated output: all scale factors are 1.0");
        }

        let divider = match FrequencyDivider::try_from(self.frequency_divider) {
            Ok(divider) => {
                let outcome = self.negotiate_divider(channel, divider);
                drained_bytes += self.drain(channel);
                outcome
            }
            Err(_) => {
                warn!(
                    "Not setting frequency divider. Parameter out of acceptable values {{1,2,4,8}}: {}",
                    self.frequency_divider
                );
                DividerOutcome::Skipped(self.frequency_divider)
            }
        };

        let primed = match send_command(channel, &Command::RequestSample) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send initial sample request");
                false
            }
        };

        HandshakeReport {
            calibration,
            calibrated,
            divider,
            primed,
            drained_bytes,
        }
    }

    fn drain<C: ByteChannel + ?Sized>(&self, channel: &mut C) -> usize {
        drain(channel, self.drain_chunk, self.drain_max_iterations)
    }

    fn query_calibration<C: ByteChannel + ?Sized>(
        &self,
        channel: &mut C,
    ) -> Result<CalibrationVector, DaqError> {
        send_command(channel, &Command::RequestCalibration)?;
        let reply = read_exact(channel, CALIBRATION_LENGTH, &self.retry)?;
        decode_calibration(&reply)
    }

    fn negotiate_divider<C: ByteChannel + ?Sized>(
        &self,
        channel: &mut C,
        divider: FrequencyDivider,
    ) -> DividerOutcome {
        if let Err(e) = send_command(channel, &Command::SetDivider(divider)) {
            warn!(error = %e, "Failed to send frequency divider");
            return DividerOutcome::Unverified(divider);
        }
        info!("Set the frequency divider to {}F", divider);

        let reply = send_command(channel, &Command::QueryDivider)
            .and_then(|()| read_exact(channel, DIVIDER_ACK_LENGTH, &self.retry));
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Could not read back the frequency divider");
                return DividerOutcome::Unverified(divider);
            }
        };

        match check_divider_ack(divider, &reply) {
            Ok(()) => DividerOutcome::Confirmed(divider),
            Err(DaqError::DividerMismatch {
                requested,
                reported,
            }) => {
                error!(
                    requested,
                    reported, "Response by sensor is not as expected! Current filter: {}F", reported
                );
                DividerOutcome::Mismatch {
                    requested,
                    reported,
                }
            }
            Err(e) => {
                warn!(error = %e, "Unreadable frequency divider echo");
                DividerOutcome::Unverified(divider)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, ReadMode};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            backoff_delay: Duration::from_micros(50),
        }
    }

    #[test]
    fn test_full_handshake_traffic() {
        let mut mock = MockAdapter::new();
        mock.set_calibration([10.0, 20.0, 30.0, 400.0, 500.0, 600.0]);

        let report = CalibrationHandshake::new(true, 4, quick_retry()).run(&mut mock);

        assert!(report.calibrated);
        assert_eq!(
            report.calibration.factors(),
            &[10.0, 20.0, 30.0, 400.0, 500.0, 600.0]
        );
        assert_eq!(report.divider, DividerOutcome::Confirmed(FrequencyDivider::Four));
        assert!(report.primed);
        assert_eq!(mock.commands(), vec!["p", "4F", "0F", "R"]);
        assert_eq!(mock.divider(), 4);
    }

    #[test]
    #[traced_test]
    fn test_divider_mismatch_is_only_a_warning() {
        let mut mock = MockAdapter::new();
        mock.report_divider(2);

        let report = CalibrationHandshake::new(true, 4, quick_retry()).run(&mut mock);

        assert_eq!(
            report.divider,
            DividerOutcome::Mismatch {
                requested: 4,
                reported: 2
            }
        );
        assert!(report.calibrated);
        assert!(report.primed);
        assert!(logs_contain("Response by sensor is not as expected"));
    }

    #[test]
    #[traced_test]
    fn test_out_of_range_divider_is_skipped() {
        let mut mock = MockAdapter::new();

        let report = CalibrationHandshake::new(false, 3, quick_retry()).run(&mut mock);

        assert_eq!(report.divider, DividerOutcome::Skipped(3));
        assert_eq!(mock.commands(), vec!["R"]);
        assert!(logs_contain("Not setting frequency divider"));
        assert!(logs_contain("uncalibrated output"));
    }

    #[test]
    #[traced_test]
    fn test_silent_sensor_falls_back_to_defaults() {
        let mut mock = MockAdapter::new();
        mock.set_read_mode(ReadMode::Starve);

        let report = CalibrationHandshake::new(true, 1, quick_retry()).run(&mut mock);

        assert!(!report.calibrated);
        assert!(report.calibration.is_default());
        assert_eq!(report.divider, DividerOutcome::Unverified(FrequencyDivider::One));
        assert!(report.primed);
        assert!(logs_contain("uncalibrated output"));
    }

    #[test]
    fn test_leftover_bytes_are_flushed_first() {
        let mut mock = MockAdapter::new();
        mock.inject(b"stale bytes from a previous session");

        let report = CalibrationHandshake::new(true, 1, quick_retry()).run(&mut mock);

        assert!(report.calibrated);
        assert_eq!(report.drained_bytes, 35);
    }
}
