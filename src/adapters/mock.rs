//! In-process simulator of the force/torque sensor.
//!
//! `MockAdapter` speaks the sensor's wire grammar: every `R` queues a
//! 27-byte sample reply, `p` queues the 46-byte calibration reply, `0F`
//! queues the 3-byte divider echo and `<n>F` changes the divider. Every
//! write is recorded so tests can assert on the exact command traffic.
//! Handles are cheap clones sharing one simulated device.

use crate::adapters::ByteChannel;
use crate::instrument::codec::{CALIBRATION_LENGTH, DATA_LENGTH, DIVIDER_ACK_LENGTH};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How the simulated device answers reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Deliver queued bytes, at most `chunk` per read.
    Normal,
    /// Never deliver anything, like an unplugged sensor.
    Starve,
    /// Fail every read with a hard I/O error.
    Fail,
}

#[derive(Debug)]
struct MockDevice {
    pending: VecDeque<u8>,
    commands: Vec<Vec<u8>>,
    tick: u8,
    raw: [u16; 6],
    calibration: [f64; 6],
    divider: u8,
    reported_divider: Option<u8>,
    malformed_samples: bool,
    read_mode: ReadMode,
    chunk: usize,
    short_writes: bool,
}

impl MockDevice {
    fn handle_command(&mut self, bytes: &[u8]) {
        match bytes {
            b"R" => {
                let reply = if self.malformed_samples {
                    let mut garbage = vec![b'?'; DATA_LENGTH - 2];
                    garbage.extend_from_slice(b"\r\n");
                    garbage
                } else {
                    sample_reply(self.tick, &self.raw)
                };
                self.tick = (self.tick + 1) % 10;
                self.pending.extend(reply);
            }
            b"p" => self.pending.extend(calibration_reply(&self.calibration)),
            b"0F" => {
                let echo = self.reported_divider.unwrap_or(self.divider);
                self.pending.extend(format!("{}\r\n", echo).into_bytes());
            }
            [digit @ b'1'..=b'9', b'F'] => self.divider = digit - b'0',
            _ => {}
        }
    }
}

/// Format a sample reply exactly as the sensor does: tick digit, six
/// 4-digit hex channels, CR LF.
pub fn sample_reply(tick: u8, raw: &[u16; 6]) -> Vec<u8> {
    let mut text = format!("{}", tick % 10);
    for value in raw {
        text.push_str(&format!("{:04X}", value));
    }
    text.push_str("\r\n");
    debug_assert_eq!(text.len(), DATA_LENGTH);
    text.into_bytes()
}

/// Format a calibration reply: six comma-separated factors, space padded to
/// the fixed reply length and terminated by CR LF.
pub fn calibration_reply(factors: &[f64; 6]) -> Vec<u8> {
    let fields: Vec<String> = factors.iter().map(|f| f.to_string()).collect();
    let mut text = fields.join(",");
    text.truncate(CALIBRATION_LENGTH - 2);
    let mut bytes = format!("{:<width$}\r\n", text, width = CALIBRATION_LENGTH - 2).into_bytes();
    bytes.truncate(CALIBRATION_LENGTH);
    bytes
}

/// Simulated sensor implementing [`ByteChannel`].
#[derive(Clone, Debug)]
pub struct MockAdapter {
    device: Arc<Mutex<MockDevice>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// A sensor at rest: every channel reads the zero point 8192 (0x2000).
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(MockDevice {
                pending: VecDeque::new(),
                commands: Vec::new(),
                tick: 0,
                raw: [8192; 6],
                calibration: [24.6, 24.3, 24.8, 1650.5, 1647.0, 1660.25],
                divider: 1,
                reported_divider: None,
                malformed_samples: false,
                read_mode: ReadMode::Normal,
                chunk: 64,
                short_writes: false,
            })),
        }
    }

    fn device(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the tick digit of the next sample reply.
    pub fn set_tick(&self, tick: u8) {
        self.device().tick = tick % 10;
    }

    /// Set the raw channel counts returned by subsequent samples.
    pub fn set_raw(&self, raw: [u16; 6]) {
        self.device().raw = raw;
    }

    /// Set the factors returned by the calibration query.
    pub fn set_calibration(&self, factors: [f64; 6]) {
        self.device().calibration = factors;
    }

    /// Make the divider query echo `divider` regardless of what was set.
    pub fn report_divider(&self, divider: u8) {
        self.device().reported_divider = Some(divider);
    }

    /// Divider most recently applied with `<n>F`.
    pub fn divider(&self) -> u8 {
        self.device().divider
    }

    /// Answer `R` with unparseable text of the right length.
    pub fn set_malformed_samples(&self, malformed: bool) {
        self.device().malformed_samples = malformed;
    }

    /// Change how reads are answered.
    pub fn set_read_mode(&self, mode: ReadMode) {
        self.device().read_mode = mode;
    }

    /// Largest number of bytes a single read returns.
    pub fn set_chunk(&self, chunk: usize) {
        self.device().chunk = chunk.max(1);
    }

    /// Accept zero bytes on every write.
    pub fn set_short_writes(&self, short: bool) {
        self.device().short_writes = short;
    }

    /// Push unsolicited bytes into the receive buffer.
    pub fn inject(&self, bytes: &[u8]) {
        self.device().pending.extend(bytes.iter().copied());
    }

    /// Bytes waiting to be read.
    pub fn pending_len(&self) -> usize {
        self.device().pending.len()
    }

    /// Every command written so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.device()
            .commands
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    /// How many times `command` was written.
    pub fn count(&self, command: &str) -> usize {
        self.device()
            .commands
            .iter()
            .filter(|c| c.as_slice() == command.as_bytes())
            .count()
    }

    /// Forget the recorded command history.
    pub fn clear_commands(&self) {
        self.device().commands.clear();
    }
}

impl ByteChannel for MockAdapter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut device = self.device();
        if device.short_writes {
            return Ok(0);
        }
        device.commands.push(bytes.to_vec());
        device.handle_command(bytes);
        Ok(bytes.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut device = self.device();
        match device.read_mode {
            ReadMode::Starve => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            ReadMode::Fail => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated device disconnected",
            )),
            ReadMode::Normal => {
                let n = buffer.len().min(device.chunk).min(device.pending.len());
                for slot in buffer.iter_mut().take(n) {
                    // n never exceeds the queue length
                    *slot = device.pending.pop_front().unwrap_or_default();
                }
                Ok(n)
            }
        }
    }
}
