//! Serial port transport for the sensor link.

use crate::adapters::ByteChannel;
use crate::error::{AppResult, DaqError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Internal read timeout. Short enough that a read with nothing pending
/// returns almost immediately, which the retry policy treats as "no data".
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Serial adapter for the sensor's raw 8N1 link
///
/// Wraps the serialport crate. The port is opened without flow control and
/// with a very short read timeout, so reads behave like reads on a
/// non-blocking descriptor.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0")
    port_name: String,

    /// Baud rate (e.g., 921600)
    baud_rate: u32,

    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialAdapter")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl SerialAdapter {
    /// Open and configure the serial device
    ///
    /// # Errors
    /// - [`DaqError::TransportOpen`] if the device cannot be opened
    /// - [`DaqError::TransportConfig`] if the port rejects or silently
    ///   alters the requested line settings
    pub fn open(port_name: &str, baud_rate: u32) -> AppResult<Self> {
        info!(device = %port_name, baud_rate, "Opening serial device");

        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::InvalidInput => DaqError::TransportConfig(format!(
                    "'{}' rejected settings ({} baud, 8N1): {}",
                    port_name, baud_rate, e.description
                )),
                _ => DaqError::TransportOpen {
                    path: port_name.to_string(),
                    source: io::Error::from(e),
                },
            })?;

        let adapter = Self {
            port_name: port_name.to_string(),
            baud_rate,
            port,
        };
        adapter.verify_settings()?;

        debug!(
            "Serial port '{}' opened at {} baud",
            adapter.port_name, adapter.baud_rate
        );
        Ok(adapter)
    }

    /// Read the line settings back so a port that fell back to OS defaults
    /// fails at startup instead of producing garbage frames.
    fn verify_settings(&self) -> AppResult<()> {
        let config_err = |what: &str, e: serialport::Error| {
            DaqError::TransportConfig(format!(
                "cannot read back {} of '{}': {}",
                what, self.port_name, e.description
            ))
        };

        let actual_baud = self
            .port
            .baud_rate()
            .map_err(|e| config_err("baud rate", e))?;
        if actual_baud != self.baud_rate {
            return Err(DaqError::TransportConfig(format!(
                "'{}' runs at {} baud instead of {}",
                self.port_name, actual_baud, self.baud_rate
            )));
        }

        let data_bits = self
            .port
            .data_bits()
            .map_err(|e| config_err("data bits", e))?;
        let flow = self
            .port
            .flow_control()
            .map_err(|e| config_err("flow control", e))?;
        if data_bits != DataBits::Eight || flow != FlowControl::None {
            return Err(DaqError::TransportConfig(format!(
                "'{}' is not in raw 8-bit mode ({:?}, {:?})",
                self.port_name, data_bits, flow
            )));
        }

        Ok(())
    }

    /// Port name this adapter was opened with.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl ByteChannel for SerialAdapter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = self.port.write(bytes)?;
        self.port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.port.read(buffer)
    }
}
