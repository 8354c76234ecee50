//! Async driver that runs a [`DeviceSync`] over a framed port.

use std::io::ErrorKind;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ControllerPort, PollConfig};
use crate::protocol::codec::RxFrame;
use crate::protocol::error::EncodeError;
use crate::protocol::response::Telemetry;
use crate::protocol::unit::{DesiredState, FanSpeed, Mode, ModeFlags};
use crate::sync::{DeviceSync, ExchangeError, TickOutcome, TransportError};

/// A requested change to the desired state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Mode(Mode),
    Fan(FanSpeed),
    Setpoint(u8),
    ModeFlags(ModeFlags),
    State(DesiredState),
}

impl Change {
    pub fn apply(self, sync: &mut DeviceSync) -> Result<(), EncodeError> {
        match self {
            Change::Mode(mode) => sync.set_mode(mode),
            Change::Fan(fan) => sync.set_fan(fan),
            Change::Setpoint(setpoint) => sync.set_setpoint(setpoint),
            Change::ModeFlags(flags) => sync.set_mode_flags(flags),
            Change::State(state) => sync.set_desired(state),
        }
    }
}

impl FromStr for Change {
    type Err = anyhow::Error;

    /// Parse a `<field> <value>` pair such as `mode cool` or `setpoint 70`.
    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();

        let (Some(field), Some(value), None) = (words.next(), words.next(), words.next()) else {
            bail!("expected `<field> <value>`, got {s:?}");
        };

        let change = match field.to_ascii_lowercase().as_str() {
            "mode" => Change::Mode(value.parse()?),
            "fan" => Change::Fan(value.parse()?),
            "setpoint" | "temp" => Change::Setpoint(value.parse()?),
            "flags" => Change::ModeFlags(value.parse()?),
            other => bail!("unknown field {other}"),
        };

        Ok(change)
    }
}

pub struct Poller {
    sync: DeviceSync,
    port: ControllerPort,

    response_timeout: Duration,
    poll_interval: Duration,
}

impl Poller {
    pub fn new(port: ControllerPort, config: PollConfig, desired: DesiredState) -> Self {
        Self {
            sync: DeviceSync::new(config.sync, desired),
            port,
            response_timeout: config.response_timeout,
            poll_interval: config.poll_interval,
        }
    }

    pub fn sync(&self) -> &DeviceSync {
        &self.sync
    }

    pub fn apply(&mut self, change: Change) -> Result<(), EncodeError> {
        change.apply(&mut self.sync)
    }

    /// One send/receive/reconcile cycle.
    pub async fn exchange(&mut self) -> TickOutcome {
        let frame = match self.sync.next_frame() {
            Some(frame) => frame,
            None => return TickOutcome::Unreachable,
        };

        self.discard_stale();

        trace!(?frame, "tx");

        let reply = match self.port.send(frame).await {
            Ok(()) => self.receive().await,
            Err(err) => Err(TransportError::Io(err).into()),
        };

        self.sync.reconcile(reply)
    }

    /// Drop anything already buffered so the next frame read is the reply to what we send.
    fn discard_stale(&mut self) {
        while let Some(Some(frame)) = self.port.next().now_or_never() {
            debug!(?frame, "discarding unsolicited frame");
        }
    }

    async fn receive(&mut self) -> Result<Telemetry, ExchangeError> {
        match timeout(self.response_timeout, self.port.next()).await {
            Err(_) => Err(TransportError::Timeout.into()),
            Ok(None) => Err(TransportError::Io(ErrorKind::UnexpectedEof.into()).into()),
            Ok(Some(Err(err))) => Err(TransportError::Io(err).into()),
            Ok(Some(Ok(RxFrame::Valid(telemetry)))) => {
                trace!(?telemetry, "rx");
                Ok(telemetry)
            }
            Ok(Some(Ok(RxFrame::Corrupted(bytes, err)))) => {
                debug!("corrupted frame {bytes:02x?}: {err}");
                Err(err.into())
            }
        }
    }

    /// Tick every poll interval until the unit becomes unreachable.
    ///
    /// Changes arriving on `changes` are applied between ticks. Each refresh is published
    /// on `telemetry`.
    pub async fn run(mut self, mut changes: mpsc::Receiver<Change>, telemetry: watch::Sender<Option<Telemetry>>) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut accepting = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.exchange().await {
                        TickOutcome::Acknowledged => info!(desired = ?self.sync.desired(), "unit acknowledged"),
                        TickOutcome::Refreshed => debug!("telemetry refreshed"),
                        TickOutcome::Retry { attempt, error } => warn!(attempt, "exchange failed: {error}"),
                        TickOutcome::Unreachable => {
                            error!(failures = self.sync.failures(), "unit unreachable");
                            bail!("unit unreachable after {} consecutive failures", self.sync.failures());
                        }
                    }

                    if let Some(observed) = self.sync.observed() {
                        telemetry.send_replace(Some(observed.clone()));
                    }
                }

                change = changes.recv(), if accepting => match change {
                    Some(change) => match self.apply(change) {
                        Ok(()) => debug!(?change, "desired state changed"),
                        Err(err) => warn!(?change, "change rejected: {err}"),
                    },
                    None => accepting = false,
                }
            }
        }
    }
}
