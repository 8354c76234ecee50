//! Validation and decoding of inbound response frames.
//!
//! A rejected frame is never fatal: the caller discards it and keeps whatever it
//! observed last.

use packed_struct::prelude::*;

use super::checksum;
use super::constants::*;
use super::error::ParseError;
use super::response::{ResponseFrame, Telemetry};

/// Length, start marker, end marker and checksum, checked in that order.
pub(crate) fn validate_envelope(bytes: &[u8], expected: usize) -> Result<(), ParseError> {
    if bytes.len() != expected {
        return Err(ParseError::WrongLength { expected, actual: bytes.len() });
    }

    let (first, last) = (bytes[0], bytes[expected - 1]);

    if first != FRAME_START {
        return Err(ParseError::BadStartByte(first));
    }

    if last != FRAME_END {
        return Err(ParseError::BadEndByte(last));
    }

    if !checksum::verify(bytes) {
        return Err(ParseError::ChecksumMismatch {
            expected: checksum::compute(bytes).unwrap_or_default(),
            actual: bytes[expected - 2],
        });
    }

    Ok(())
}

/// Validate `bytes` and unpack the raw response layout.
pub fn parse_response(bytes: &[u8]) -> Result<ResponseFrame, ParseError> {
    validate_envelope(bytes, RESPONSE_FRAME_LEN)?;

    let wrong_length = || ParseError::WrongLength { expected: RESPONSE_FRAME_LEN, actual: bytes.len() };

    // every field is a plain integer, so only the buffer size can fail to unpack
    let raw: &[u8; RESPONSE_FRAME_LEN] = bytes.try_into().map_err(|_| wrong_length())?;
    ResponseFrame::unpack(raw).map_err(|_| wrong_length())
}

/// Validate `bytes` and decode them into typed telemetry.
pub fn decode_response(bytes: &[u8]) -> Result<Telemetry, ParseError> {
    parse_response(bytes).map(|frame| Telemetry::from(&frame))
}
