//! Conversion from raw channel counts to physical units.

use crate::instrument::codec::{RawSample, ZERO_POINT};
use serde::{Deserialize, Serialize};

/// Per-axis scale factors: Fx, Fy, Fz in LSB/N then Tx, Ty, Tz in LSB/Nm.
///
/// Defaults to 1.0 on every axis, which publishes offset-corrected raw
/// counts. Set once by the startup handshake and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationVector {
    factors: [f64; 6],
}

impl Default for CalibrationVector {
    fn default() -> Self {
        Self { factors: [1.0; 6] }
    }
}

impl CalibrationVector {
    /// Wrap factors already known to be positive.
    pub fn new(factors: [f64; 6]) -> Self {
        Self { factors }
    }

    /// The six scale factors in axis order.
    pub fn factors(&self) -> &[f64; 6] {
        &self.factors
    }

    /// Whether every factor is still the 1.0 default.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Convert raw counts to physical units: `(raw - 8192) / factor`.
    pub fn apply(&self, sample: &RawSample) -> [f64; 6] {
        let mut values = [0.0; 6];
        for ((value, raw), factor) in values
            .iter_mut()
            .zip(sample.channels.iter())
            .zip(self.factors.iter())
        {
            *value = (f64::from(*raw) - f64::from(ZERO_POINT)) / factor;
        }
        values
    }
}
