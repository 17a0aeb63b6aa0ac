//! Core library for the dynpick_daq driver.
//!
//! Acquires readings from a serial 6-axis force/torque sensor, converts raw
//! counts to calibrated units and coordinates in-sensor offset resets with
//! the running acquisition loop.
//!
//! The pieces, leaves first:
//! - [`adapters`]: the byte channel to the sensor (serial port or simulator)
//! - [`instrument`]: wire codec, request/reply helpers, startup handshake
//! - [`reset`]: offset reset coordination between requesters and the loop
//! - [`sampling`]: the fixed-rate acquisition loop
//! - [`measurement`]: calibrated frames and the sink they are published to

pub mod adapters;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod instrument;
pub mod measurement;
pub mod reset;
pub mod sampling;
