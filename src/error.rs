//! Custom error types for the driver.
//!
//! `DaqError` is the single error type of the library. It separates the two
//! classes of failure the driver cares about:
//!
//! - **Fatal** startup failures: [`DaqError::TransportOpen`] and
//!   [`DaqError::TransportConfig`]. Without a correctly configured device the
//!   process cannot do anything useful, so these are surfaced to `main`.
//! - **Recoverable** per-tick failures: short reads, incomplete writes, decode
//!   mismatches and divider mismatches. The sampling loop absorbs these, logs
//!   them and carries on with the next tick.
//!
//! [`DaqError::ResetTimeout`] is returned to a reset requester whose bounded
//! wait expired before the sampling loop finished sending reset commands.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure kind the driver can report.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The serial device could not be opened
    #[error("Failed to open serial device '{path}': {source}")]
    TransportOpen {
        /// Device path
        path: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The device refused or silently ignored the requested settings
    #[error("Serial device configuration failed: {0}")]
    TransportConfig(String),

    /// Fewer bytes were accepted than the command has
    #[error("Incomplete write: {written} of {expected} bytes sent")]
    WriteIncomplete {
        /// Bytes accepted
        written: usize,
        /// Command length
        expected: usize,
    },

    /// The reply did not complete within the empty-read bound
    #[error("Short read: got {received} of {expected} bytes after {attempts} empty reads")]
    ShortRead {
        /// Reply length
        expected: usize,
        /// Bytes received before giving up
        received: usize,
        /// Consecutive empty reads
        attempts: u32,
    },

    /// Hard I/O failure on the link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply did not match the wire format
    #[error("Malformed frame: {0}")]
    DecodeMismatch(String),

    /// The sensor echoed a different divider than requested
    #[error("Frequency divider mismatch: requested {requested}, sensor reports {reported}")]
    DividerMismatch {
        /// Divider sent
        requested: u8,
        /// Divider echoed
        reported: u8,
    },

    /// A reset requester gave up waiting
    #[error("Offset reset not completed within {0:?}")]
    ResetTimeout(Duration),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds invalid values
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    /// Whether this error must stop the process rather than a single tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::TransportOpen { .. } | DaqError::TransportConfig(_)
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::ShortRead {
            expected: 27,
            received: 5,
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "Short read: got 5 of 27 bytes after 10 empty reads"
        );
    }

    #[test]
    fn test_only_transport_setup_is_fatal() {
        let open = DaqError::TransportOpen {
            path: "/dev/ttyUSB0".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(open.is_fatal());
        assert!(DaqError::TransportConfig("baud".into()).is_fatal());
        assert!(!DaqError::DecodeMismatch("bad hex".into()).is_fatal());
        assert!(!DaqError::ResetTimeout(Duration::from_secs(1)).is_fatal());
        assert!(!DaqError::DividerMismatch {
            requested: 4,
            reported: 2
        }
        .is_fatal());
    }
}
