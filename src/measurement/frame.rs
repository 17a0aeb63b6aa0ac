//! The calibrated reading published once per sampling tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Three-component vector in sensor coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

/// One calibrated force/torque reading, ready for publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedFrame {
    /// Coordinate frame the reading is expressed in
    pub frame_id: String,
    /// Host time the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Process-lifetime sequence counter, starting at 0
    pub sequence: u64,
    /// Force in N
    pub force: Vector3,
    /// Torque in Nm
    pub torque: Vector3,
}

impl CalibratedFrame {
    /// Build a frame from values in Fx, Fy, Fz, Tx, Ty, Tz order.
    pub fn from_values(
        frame_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: u64,
        values: [f64; 6],
    ) -> Self {
        let [fx, fy, fz, tx, ty, tz] = values;
        Self {
            frame_id: frame_id.into(),
            timestamp,
            sequence,
            force: Vector3 { x: fx, y: fy, z: fz },
            torque: Vector3 { x: tx, y: ty, z: tz },
        }
    }

    /// Values back in Fx, Fy, Fz, Tx, Ty, Tz order.
    pub fn values(&self) -> [f64; 6] {
        [
            self.force.x,
            self.force.y,
            self.force.z,
            self.torque.x,
            self.torque.y,
            self.torque.z,
        ]
    }
}
