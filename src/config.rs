use std::time::Duration;

use futures::{Sink, Stream};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{Framed, FramedRead};
use url::Url;
use anyhow::{Result, Context, bail};

use crate::protocol::codec::{BusFrame, ControllerCodec, MonitorCodec, RxFrame, UnitCodec};
use crate::protocol::constants::BAUD_RATE;
use crate::protocol::encoder::CommandFrame;
use crate::protocol::response::{ResponseFrame, Telemetry};
use crate::sync::SyncSettings;


pub enum Port {
    Serial(SerialStream),
    TcpRaw(TcpStream)
}


/// A framed port: a `Stream` of received frames and a `Sink` for frames to send.
pub trait PortStream<Rx, Tx>: Stream<Item = std::io::Result<RxFrame<Rx>>> + Sink<Tx, Error = std::io::Error> + Send + Unpin {}

impl<T, Rx, Tx> PortStream<Rx, Tx> for T
where
    T: Stream<Item = std::io::Result<RxFrame<Rx>>> + Sink<Tx, Error = std::io::Error> + Send + Unpin,
{}

/// The controller end of the link: sends commands, receives telemetry.
pub type ControllerPort = Box<dyn PortStream<Telemetry, CommandFrame>>;

/// The unit end of the link: receives commands, sends responses.
pub type UnitPort = Box<dyn PortStream<CommandFrame, ResponseFrame>>;

pub type MonitorPort = Box<dyn Stream<Item = std::io::Result<RxFrame<BusFrame>>> + Send + Unpin>;


/// Validate a port URL without opening it.
///
/// Returns the serial device path for `serial://` URLs, or the host and port for `tcp+raw://`.
pub enum PortAddress {
    Serial(String),
    TcpRaw(String, u16),
}

impl PortAddress {
    pub fn parse(url: &Url) -> Result<Self> {
        match url.scheme() {
            "serial" => Ok(Self::Serial(url.path().to_string())),
            "tcp+raw" => {
                let host = url.host_str()
                    .with_context(|| format!("tcp+raw requires a host to be specified in the url: {url}"))?;

                let port = url.port()
                    .with_context(|| format!("tcp+raw requires a port number to be specified in the url: {url}"))?;

                Ok(Self::TcpRaw(host.to_string(), port))
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }
}


impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        match PortAddress::parse(url)? {
            PortAddress::Serial(path) => {
                let port = tokio_serial::new(&path, BAUD_RATE)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .parity(tokio_serial::Parity::None)
                    .stop_bits(tokio_serial::StopBits::One)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {path}"))
                    ?;

                Ok(Self::Serial(port))
            },
            PortAddress::TcpRaw(host, port) => {
                let stream = TcpStream::connect((host.as_str(), port)).await
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::TcpRaw(stream))
            }
        }
    }

    pub fn framed_controller(self) -> ControllerPort {
        match self {
            Port::Serial(port) => Box::new(Framed::new(port, ControllerCodec)),
            Port::TcpRaw(stream) => Box::new(Framed::new(stream, ControllerCodec)),
        }
    }

    pub fn framed_unit(self) -> UnitPort {
        match self {
            Port::Serial(port) => Box::new(Framed::new(port, UnitCodec)),
            Port::TcpRaw(stream) => Box::new(Framed::new(stream, UnitCodec)),
        }
    }

    pub fn framed_monitor(self) -> MonitorPort {
        match self {
            Port::Serial(port) => Box::new(FramedRead::new(port, MonitorCodec)),
            Port::TcpRaw(stream) => Box::new(FramedRead::new(stream, MonitorCodec)),
        }
    }
}


/// Settings for driving a unit periodically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub sync: SyncSettings,

    /// How long to wait for the unit to answer a frame.
    pub response_timeout: Duration,

    /// Time between ticks.
    pub poll_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            response_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
        }
    }
}
