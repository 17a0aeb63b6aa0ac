//! Calibrated readings and where they go.

pub mod calibration;
pub mod frame;

pub use calibration::CalibrationVector;
pub use frame::{CalibratedFrame, Vector3};

use tokio::sync::broadcast;

/// Receives one [`CalibratedFrame`] per successful sampling tick.
///
/// Called from the sampling thread while the tick holds the reset lock, so
/// implementations should not block.
pub trait FrameSink {
    /// Hand over one frame.
    fn publish(&mut self, frame: CalibratedFrame);
}

impl FrameSink for broadcast::Sender<CalibratedFrame> {
    fn publish(&mut self, frame: CalibratedFrame) {
        // No subscribers is not an error; frames are simply dropped.
        let _ = self.send(frame);
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn publish(&mut self, frame: CalibratedFrame) {
        (**self).publish(frame);
    }
}
