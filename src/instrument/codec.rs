//! Wire codec for the sensor's ASCII protocol
//!
//! Protocol overview:
//! - Commands are one or two ASCII characters, no terminator
//! - Sample reply: `T HHHH HHHH HHHH HHHH HHHH HHHH \r\n` without the spaces,
//!   a tick digit followed by six 4-digit hex channel counts (27 bytes)
//! - Calibration reply: six comma-separated decimal factors (46 bytes)
//! - Divider echo: one decimal digit followed by CR LF (3 bytes)
//! - Timing: strictly half-duplex request/reply
//!
//! Length correctness is the transport's job; decoders are handed exactly
//! as many bytes as the reply length.

use crate::error::{AppResult, DaqError};
use crate::measurement::CalibrationVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a sample reply.
pub const DATA_LENGTH: usize = 27;
/// Length of a calibration reply.
pub const CALIBRATION_LENGTH: usize = 46;
/// Length of a divider query reply.
pub const DIVIDER_ACK_LENGTH: usize = 3;
/// Raw count corresponding to zero load on a channel.
pub const ZERO_POINT: u16 = 8192;

const CHANNELS: usize = 6;
const HEX_WIDTH: usize = 4;

/// Device-side decimation factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrequencyDivider {
    /// Every internal sample is output
    One,
    /// Every second sample
    Two,
    /// Every fourth sample
    Four,
    /// Every eighth sample
    Eight,
}

impl FrequencyDivider {
    /// Numeric value sent on the wire.
    pub fn value(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for FrequencyDivider {
    type Error = DaqError;

    fn try_from(value: u8) -> AppResult<Self> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(DaqError::Configuration(format!(
                "frequency divider {} not in {{1,2,4,8}}",
                other
            ))),
        }
    }
}

impl fmt::Display for FrequencyDivider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Commands understood by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `R`: request one sample
    RequestSample,
    /// `O`: zero the sensor offset
    ResetOffset,
    /// `p`: request the calibration factors
    RequestCalibration,
    /// `<n>F`: set the frequency divider
    SetDivider(FrequencyDivider),
    /// `0F`: query the current frequency divider
    QueryDivider,
}

impl Command {
    /// Bytes written to the device for this command.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::RequestSample => b"R".to_vec(),
            Self::ResetOffset => b"O".to_vec(),
            Self::RequestCalibration => b"p".to_vec(),
            Self::SetDivider(divider) => format!("{}F", divider.value()).into_bytes(),
            Self::QueryDivider => b"0F".to_vec(),
        }
    }

    /// Length of the reply the device sends back, if any is awaited.
    pub fn reply_length(&self) -> Option<usize> {
        match self {
            Self::RequestSample => Some(DATA_LENGTH),
            Self::RequestCalibration => Some(CALIBRATION_LENGTH),
            Self::QueryDivider => Some(DIVIDER_ACK_LENGTH),
            Self::ResetOffset | Self::SetDivider(_) => None,
        }
    }
}

/// One undecoded-to-physical sensor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    /// Device tick digit, wraps 0-9
    pub tick: u8,
    /// Fx, Fy, Fz, Tx, Ty, Tz in raw counts
    pub channels: [u16; CHANNELS],
}

impl RawSample {
    /// A reading at the zero point on every channel; calibrates to all zeros.
    pub fn neutral() -> Self {
        Self {
            tick: 0,
            channels: [ZERO_POINT; CHANNELS],
        }
    }
}

/// Decode a sample reply: one decimal digit then six 4-digit hex fields at
/// fixed columns.
pub fn decode_sample(bytes: &[u8]) -> AppResult<RawSample> {
    let needed = 1 + CHANNELS * HEX_WIDTH;
    if bytes.len() < needed {
        return Err(DaqError::DecodeMismatch(format!(
            "sample frame has {} bytes, need at least {}",
            bytes.len(),
            needed
        )));
    }

    let tick = match bytes[0] {
        digit @ b'0'..=b'9' => digit - b'0',
        other => {
            return Err(DaqError::DecodeMismatch(format!(
                "tick is not a digit: {:?}",
                other as char
            )))
        }
    };

    let mut channels = [0u16; CHANNELS];
    for (index, field) in bytes[1..needed].chunks_exact(HEX_WIDTH).enumerate() {
        channels[index] = parse_hex_field(field).ok_or_else(|| {
            DaqError::DecodeMismatch(format!(
                "channel {} is not hex: {:?}",
                index,
                String::from_utf8_lossy(field)
            ))
        })?;
    }

    Ok(RawSample { tick, channels })
}

fn parse_hex_field(field: &[u8]) -> Option<u16> {
    if !field.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(field).ok()?;
    u16::from_str_radix(text, 16).ok()
}

/// Decode a calibration reply into scale factors
///
/// Takes the first six comma-separated fields; whitespace, CR/LF and NUL
/// padding around a field are ignored. Every factor must be a finite,
/// strictly positive number since readings are divided by it.
pub fn decode_calibration(bytes: &[u8]) -> AppResult<CalibrationVector> {
    let text = String::from_utf8_lossy(bytes);
    let fields: Vec<&str> = text
        .split(',')
        .map(|f| f.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .collect();

    if fields.len() < CHANNELS {
        return Err(DaqError::DecodeMismatch(format!(
            "calibration reply has {} fields, need {}",
            fields.len(),
            CHANNELS
        )));
    }

    let mut factors = [0.0f64; CHANNELS];
    for (index, field) in fields.iter().take(CHANNELS).enumerate() {
        let value: f64 = field.parse().map_err(|_| {
            DaqError::DecodeMismatch(format!("calibration field {} is not a number: {:?}", index, field))
        })?;
        if !(value.is_finite() && value > 0.0) {
            return Err(DaqError::DecodeMismatch(format!(
                "calibration field {} must be positive, got {}",
                index, value
            )));
        }
        factors[index] = value;
    }

    Ok(CalibrationVector::new(factors))
}

/// Decode the divider echo digit.
pub fn decode_divider_ack(bytes: &[u8]) -> AppResult<u8> {
    match bytes.first() {
        Some(digit @ b'0'..=b'9') => Ok(digit - b'0'),
        other => Err(DaqError::DecodeMismatch(format!(
            "divider reply is not a digit: {:?}",
            other.map(|b| *b as char)
        ))),
    }
}

/// Compare the divider echo against the requested divider
///
/// A mismatch is reported as [`DaqError::DividerMismatch`]; callers treat
/// it as a warning, the device keeps running at whatever it applied.
pub fn check_divider_ack(requested: FrequencyDivider, bytes: &[u8]) -> AppResult<()> {
    let reported = decode_divider_ack(bytes)?;
    if reported != requested.value() {
        return Err(DaqError::DividerMismatch {
            requested: requested.value(),
            reported,
        });
    }
    Ok(())
}
