use bytes::{Buf, BufMut, BytesMut};
use packed_struct::PackingError;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::decoder::decode_response;
use super::encoder::CommandFrame;
use super::error::ParseError;
use super::response::{ResponseFrame, Telemetry};

/// A frame read from a port.
#[derive(Clone, Debug)]
pub enum RxFrame<T> {
    Valid(T),

    /// Correctly delimited but rejected by validation.
    Corrupted(Vec<u8>, ParseError),
}

/// Either kind of frame seen on the bus, for passive monitoring.
#[derive(Clone, Debug)]
pub enum BusFrame {
    Command(CommandFrame),
    Response(Telemetry),
}

#[derive(Error, Debug)]
enum FramingError {
    #[error("input buffer too small")]
    BufferTooSmall,
    #[error("end of frame marker not found")]
    FrameEndNotFound,
}

/// Check that a `size` byte frame starting at `src[0]` is fully buffered and delimited.
fn try_read_frame(src: &BytesMut, size: usize) -> Result<(), FramingError> {
    if src.len() < size {
        return Err(FramingError::BufferTooSmall);
    }

    if src[size - 1] != FRAME_END {
        return Err(FramingError::FrameEndNotFound);
    }

    Ok(())
}

/// Pull the next frame out of `src`, trying each of `sizes` in order.
fn decode_frame<T, F>(src: &mut BytesMut, sizes: &[usize], parse: F) -> Option<RxFrame<T>> where
    F: Fn(&[u8]) -> Result<T, ParseError>
{
    loop {
        if src.is_empty() {
            return None;
        }

        if src[0] != FRAME_START {
            // junk before the start of a frame -- skip it to resync
            src.advance(1);
            continue;
        }

        let mut need_more = false;
        let mut corrupted = None;

        for &size in sizes {
            match try_read_frame(src, size) {
                Ok(()) => match parse(&src[..size]) {
                    Ok(frame) => {
                        src.advance(size);
                        return Some(RxFrame::Valid(frame));
                    }
                    Err(err) => {
                        corrupted.get_or_insert((size, err));
                    }
                },
                Err(FramingError::BufferTooSmall) => need_more = true,
                Err(FramingError::FrameEndNotFound) => (),
            }
        }

        // a longer frame may still validate once the rest of it arrives
        if need_more {
            return None;
        }

        if let Some((size, err)) = corrupted {
            let bytes = src.split_to(size).to_vec();
            return Some(RxFrame::Corrupted(bytes, err));
        }

        // start marker without a matching end marker -- likely a 0xaa inside a previous
        // frame and the stream has lost sync
        src.advance(1);
    }
}

/// Codec for the controller side of the link: sends command frames, reads responses.
#[derive(Debug, Default)]
pub struct ControllerCodec;

impl Decoder for ControllerCodec {
    type Item = RxFrame<Telemetry>;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src, &[RESPONSE_FRAME_LEN], decode_response))
    }
}

impl Encoder<CommandFrame> for ControllerCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: CommandFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(COMMAND_FRAME_LEN);
        dst.put_slice(frame.as_bytes());

        Ok(())
    }
}

/// Codec for the unit side of the link: reads command frames, sends responses.
#[derive(Debug, Default)]
pub struct UnitCodec;

impl Decoder for UnitCodec {
    type Item = RxFrame<CommandFrame>;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src, &[COMMAND_FRAME_LEN], CommandFrame::parse))
    }
}

impl Encoder<ResponseFrame> for UnitCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = frame.seal()
            .map_err(|err: PackingError| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{err:?}")))?;

        dst.reserve(RESPONSE_FRAME_LEN);
        dst.put_slice(&bytes);

        Ok(())
    }
}

/// Read-only codec decoding both directions of traffic.
#[derive(Debug, Default)]
pub struct MonitorCodec;

impl Decoder for MonitorCodec {
    type Item = RxFrame<BusFrame>;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let parse = |bytes: &[u8]| match bytes.len() {
            COMMAND_FRAME_LEN => CommandFrame::parse(bytes).map(BusFrame::Command),
            _ => decode_response(bytes).map(BusFrame::Response),
        };

        Ok(decode_frame(src, &[COMMAND_FRAME_LEN, RESPONSE_FRAME_LEN], parse))
    }
}
