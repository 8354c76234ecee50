use thiserror::Error;

use super::layout::Field;

/// Reasons an inbound buffer was rejected.
///
/// All of these are recoverable: discard the frame and keep the previously observed state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("wrong frame length (expected {expected}, actual: {actual})")]
    WrongLength {
        expected: usize,
        actual: usize,
    },
    #[error("start of frame marker not found (got {0:#04x})")]
    BadStartByte(u8),
    #[error("end of frame marker not found (got {0:#04x})")]
    BadEndByte(u8),
    #[error("invalid checksum (expected {expected:#04x}, actual: {actual:#04x})")]
    ChecksumMismatch {
        expected: u8,
        actual: u8,
    },
}

/// Reasons a desired state could not be turned into a command frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("mode byte {0:#04x} has no protocol encoding")]
    UnsupportedMode(u8),
    #[error("fan byte {0:#04x} has no protocol encoding")]
    UnsupportedFan(u8),
    #[error("setpoint {value} outside of configured range {min}..={max}")]
    TemperatureOutOfRange {
        value: u8,
        min: u8,
        max: u8,
    },
    #[error("field {0:?} is not present in the selected protocol variant")]
    UnsupportedField(Field),
}
