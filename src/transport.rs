//! Blocking transport over a serial device or raw TCP socket.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_serial::{ClearBuffer, SerialPort};
use url::Url;

use crate::config::PortAddress;
use crate::protocol::constants::{BAUD_RATE, FRAME_START, RESPONSE_FRAME_LEN};
use crate::protocol::encoder::CommandFrame;
use crate::sync::{Transport, TransportError};

/// Any byte pipe the unit can be reached over.
pub trait Link: Read + Write + Send {
    /// Throw away whatever has been received but not read yet.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Bound the next read to `timeout`.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

impl Link for TcpStream {
    fn discard_input(&mut self) -> io::Result<()> {
        self.set_nonblocking(true)?;

        let mut buf = [0u8; 64];
        let drained = loop {
            match self.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };

        self.set_nonblocking(false)?;
        drained
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout))
    }
}

pub struct BlockingTransport {
    link: Box<dyn Link>,

    /// Upper bound on the whole wait for a response, noise included.
    response_timeout: Duration,
}

impl BlockingTransport {
    pub fn new(link: impl Link + 'static, response_timeout: Duration) -> Self {
        Self {
            link: Box::new(link),
            response_timeout,
        }
    }

    pub fn open(url: &Url, response_timeout: Duration) -> Result<Self> {
        match PortAddress::parse(url)? {
            PortAddress::Serial(path) => {
                let port = tokio_serial::new(&path, BAUD_RATE)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .parity(tokio_serial::Parity::None)
                    .stop_bits(tokio_serial::StopBits::One)
                    .timeout(response_timeout)
                    .open()
                    .with_context(|| format!("failed to open serial port {path}"))?;

                Ok(Self::new(port, response_timeout))
            }
            PortAddress::TcpRaw(host, port) => {
                let stream = TcpStream::connect((host.as_str(), port))
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::new(stream, response_timeout))
            }
        }
    }

    /// Skip anything ahead of the next start marker, then read the rest of the frame.
    fn read_response(&mut self) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.response_timeout;
        let mut byte = [0u8; 1];

        loop {
            self.read_before(deadline, &mut byte)?;
            if byte[0] == FRAME_START {
                break;
            }
        }

        let mut frame = vec![0u8; RESPONSE_FRAME_LEN];
        frame[0] = FRAME_START;

        let mut filled = 1;
        while filled < RESPONSE_FRAME_LEN {
            filled += self.read_before(deadline, &mut frame[filled..])?;
        }

        Ok(frame)
    }

    /// A single read that gives up once `deadline` has passed.
    fn read_before(&mut self, deadline: Instant, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ErrorKind::TimedOut.into());
        }

        self.link.set_read_timeout(remaining)?;

        match self.link.read(buf) {
            Ok(0) => Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(err),
        }
    }
}

impl Transport for BlockingTransport {
    fn transmit(&mut self, frame: &CommandFrame) -> Result<Vec<u8>, TransportError> {
        // a late reply to an earlier frame must not be taken for this one's
        self.link.discard_input()?;

        self.link.write_all(frame.as_bytes())?;
        self.link.flush()?;

        self.read_response().map_err(|err| match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::UnexpectedEof => TransportError::Timeout,
            _ => TransportError::Io(err),
        })
    }
}
