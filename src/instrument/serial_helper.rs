//! Blocking request/reply helpers over a [`ByteChannel`]
//!
//! The sensor link is opened non-blocking, so a read may return nothing or
//! only part of a reply. These helpers turn that into the three operations
//! the driver needs: send a command, read an exact-length reply with a
//! bounded number of empty reads, and flush whatever is left in the buffer.

use crate::adapters::{is_no_data, ByteChannel};
use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::instrument::codec::Command;
use std::thread;
use tracing::{debug, trace};

/// Encode and write a command; a partial write is an error.
pub fn send_command<C: ByteChannel + ?Sized>(channel: &mut C, command: &Command) -> AppResult<()> {
    let bytes = command.encode();
    let written = channel.write(&bytes)?;
    if written != bytes.len() {
        return Err(DaqError::WriteIncomplete {
            written,
            expected: bytes.len(),
        });
    }
    trace!(command = %String::from_utf8_lossy(&bytes), "Sent command");
    Ok(())
}

/// Accumulate exactly `length` bytes
///
/// Empty reads are retried after `policy.backoff_delay`; once
/// `policy.max_attempts` of them happen in a row the read gives up with
/// [`DaqError::ShortRead`]. Any progress resets the count. Hard I/O errors
/// are returned immediately instead of being retried.
pub fn read_exact<C: ByteChannel + ?Sized>(
    channel: &mut C,
    length: usize,
    policy: &RetryPolicy,
) -> AppResult<Vec<u8>> {
    let mut reply = vec![0u8; length];
    let mut received = 0;
    let mut empty_reads = 0u32;

    while received < length {
        let n = match channel.read(&mut reply[received..]) {
            Ok(n) => n,
            Err(e) if is_no_data(&e) => 0,
            Err(e) => return Err(DaqError::Io(e)),
        };

        if n > 0 {
            received += n;
            empty_reads = 0;
            continue;
        }

        empty_reads += 1;
        if empty_reads >= policy.max_attempts {
            return Err(DaqError::ShortRead {
                expected: length,
                received,
                attempts: empty_reads,
            });
        }
        thread::sleep(policy.backoff_delay);
    }

    Ok(reply)
}

/// Discard buffered bytes until the link is quiet
///
/// Stops at the first empty read or after `max_iterations` reads, whichever
/// comes first, so a device streaming faster than we drain cannot trap the
/// caller. Returns the number of bytes discarded.
pub fn drain<C: ByteChannel + ?Sized>(channel: &mut C, chunk: usize, max_iterations: u32) -> usize {
    let mut scratch = vec![0u8; chunk.max(1)];
    let mut discarded = 0;

    for _ in 0..max_iterations {
        match channel.read(&mut scratch) {
            Ok(n) if n > 0 => {
                discarded += n;
                debug!(n, total = discarded, "More data to clean up");
            }
            Ok(_) => break,
            Err(e) if is_no_data(&e) => break,
            Err(e) => {
                debug!(error = %e, "Drain stopped on read error");
                break;
            }
        }
    }

    if discarded == 0 {
        trace!("No more data on the link");
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, ReadMode};
    use crate::instrument::codec::DATA_LENGTH;
    use std::time::{Duration, Instant};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay: Duration::from_micros(50),
        }
    }

    #[test]
    fn test_read_exact_accumulates_partial_reads() {
        let mut mock = MockAdapter::new();
        mock.set_chunk(4);
        mock.set_tick(7);
        send_command(&mut mock, &Command::RequestSample).unwrap();

        let reply = read_exact(&mut mock, DATA_LENGTH, &quick_policy(5)).unwrap();
        assert_eq!(reply.len(), DATA_LENGTH);
        assert_eq!(reply[0], b'7');
        assert_eq!(mock.pending_len(), 0);
    }

    #[test]
    fn test_read_exact_gives_up_on_starved_link() {
        let mut mock = MockAdapter::new();
        mock.set_read_mode(ReadMode::Starve);

        let started = Instant::now();
        let err = read_exact(&mut mock, DATA_LENGTH, &quick_policy(20)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            DaqError::ShortRead {
                expected,
                received,
                attempts,
            } => {
                assert_eq!(expected, DATA_LENGTH);
                assert_eq!(received, 0);
                assert_eq!(attempts, 20);
            }
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }

    #[test]
    fn test_read_exact_reports_partial_progress() {
        let mut mock = MockAdapter::new();
        mock.inject(b"5200020");
        let err = read_exact(&mut mock, DATA_LENGTH, &quick_policy(3)).unwrap_err();
        assert!(matches!(err, DaqError::ShortRead { received: 7, .. }));
    }

    #[test]
    fn test_read_exact_fails_fast_on_hard_error() {
        let mut mock = MockAdapter::new();
        mock.set_read_mode(ReadMode::Fail);
        let err = read_exact(&mut mock, DATA_LENGTH, &quick_policy(1_000_000)).unwrap_err();
        assert!(matches!(err, DaqError::Io(_)));
    }

    #[test]
    fn test_send_command_detects_short_write() {
        let mut mock = MockAdapter::new();
        mock.set_short_writes(true);
        let err = send_command(&mut mock, &Command::QueryDivider).unwrap_err();
        assert!(matches!(
            err,
            DaqError::WriteIncomplete {
                written: 0,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_drain_discards_leftovers() {
        let mut mock = MockAdapter::new();
        mock.set_chunk(16);
        mock.inject(&[b'x'; 100]);
        assert_eq!(drain(&mut mock, 255, 16), 100);
        assert_eq!(mock.pending_len(), 0);
        assert_eq!(drain(&mut mock, 255, 16), 0);
    }

    #[test]
    fn test_drain_is_capped() {
        let mut mock = MockAdapter::new();
        mock.set_chunk(10);
        mock.inject(&[b'x'; 100]);
        assert_eq!(drain(&mut mock, 255, 3), 30);
        assert_eq!(mock.pending_len(), 70);
    }

    #[test]
    fn test_drain_tolerates_hard_errors() {
        let mut mock = MockAdapter::new();
        mock.set_read_mode(ReadMode::Fail);
        assert_eq!(drain(&mut mock, 255, 16), 0);
    }
}
