//! Byte-level transport adapters
//!
//! The driver talks to the sensor through the [`ByteChannel`] trait: a
//! blocking write and a non-blocking read. [`SerialAdapter`] is the real
//! serial port, [`MockAdapter`] an in-process simulator of the sensor.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock::{MockAdapter, ReadMode};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use std::io;

/// Raw read/write primitive over a configured serial link.
///
/// `read` must not block indefinitely. `Ok(0)` and the error kinds accepted
/// by [`is_no_data`] mean "nothing available yet"; every other error is a
/// hard failure of the link.
pub trait ByteChannel {
    /// Write `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Read whatever is available into `buffer`.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).read(buffer)
    }
}

/// Whether a read error only means that no data is available right now.
pub fn is_no_data(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
