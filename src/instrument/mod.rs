//! Sensor protocol: wire codec, request/reply helpers and the startup
//! handshake.

pub mod codec;
pub mod handshake;
pub mod serial_helper;

pub use codec::{Command, FrequencyDivider, RawSample};
pub use handshake::{CalibrationHandshake, DividerOutcome, HandshakeReport};
