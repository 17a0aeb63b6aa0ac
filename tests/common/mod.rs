//! Common test utilities for dynpick_daq integration tests
//!
//! This module provides reusable test helpers for:
//! - Settings tuned for fast, bounded tests
//! - A frame sink whose contents can be inspected from the test thread
//! - Running the sampling loop on its own thread against the simulator

#![allow(dead_code)] // Utilities may not all be used by every test file

use dynpick_daq::adapters::MockAdapter;
use dynpick_daq::config::Settings;
use dynpick_daq::measurement::{CalibratedFrame, CalibrationVector, FrameSink};
use dynpick_daq::reset::ResetState;
use dynpick_daq::sampling::SamplingLoop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Settings with short retry bounds so starved reads fail within milliseconds.
pub fn test_settings(rate_hz: f64) -> Settings {
    let mut settings = Settings::default();
    settings.device.rate_hz = rate_hz;
    settings.retry.max_empty_reads = 20;
    settings.retry.backoff_us = 100;
    settings
}

/// Sink that shares collected frames with the test.
#[derive(Clone, Default)]
pub struct SharedSink {
    frames: Arc<Mutex<Vec<CalibratedFrame>>>,
}

impl SharedSink {
    pub fn frames(&self) -> Vec<CalibratedFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl FrameSink for SharedSink {
    fn publish(&mut self, frame: CalibratedFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

/// A sampling loop running on its own thread.
pub struct RunningSampler {
    pub shutdown: Arc<AtomicBool>,
    pub handle: JoinHandle<u64>,
}

impl RunningSampler {
    pub fn start(
        mock: &MockAdapter,
        sink: &SharedSink,
        reset: &Arc<ResetState>,
        calibration: CalibrationVector,
        settings: &Settings,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut sampler = SamplingLoop::new(
            mock.clone(),
            sink.clone(),
            Arc::clone(reset),
            calibration,
            settings,
        );
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || sampler.run(&flag));
        Self { shutdown, handle }
    }

    /// Raise the shutdown flag and return the number of ticks run.
    pub fn stop(self) -> u64 {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.join().unwrap()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
