//! Reconciles the state a caller wants with what the unit has acknowledged.
//!
//! The protocol has no sequence or correlation field. Correctness depends on the transport
//! being strictly half-duplex with a single outstanding request: whatever valid response
//! arrives after a Set frame is taken to be the acknowledgement of that frame.

use thiserror::Error;

use crate::protocol::decoder::decode_response;
use crate::protocol::encoder::{CommandFrame, CommandType, FrameEncoder, SetpointRange};
use crate::protocol::error::{EncodeError, ParseError};
use crate::protocol::layout::ProtocolVariant;
use crate::protocol::response::Telemetry;
use crate::protocol::unit::{DesiredState, FanSpeed, Mode, ModeFlags};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an exchange with the unit did not produce usable telemetry.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("invalid response: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A blocking, half-duplex link to the unit: send one frame, wait for one reply.
pub trait Transport {
    fn transmit(&mut self, frame: &CommandFrame) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, frame: &CommandFrame) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(frame)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, frame: &CommandFrame) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing pending; ticks poll for telemetry.
    Idle,

    /// The desired state changed and has not been sent yet.
    Dirty,

    /// A Set frame was sent and is awaiting a valid response.
    InFlight,

    /// Too many consecutive exchanges failed. Nothing is sent until [`DeviceSync::reset`].
    Unreachable,
}

/// Result of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The in-flight Set frame was answered.
    Acknowledged,

    /// A poll was answered.
    Refreshed,

    /// The exchange failed and will be retried on the next tick.
    Retry {
        attempt: u32,
        error: ExchangeError,
    },

    /// The retry bound has been reached.
    Unreachable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub variant: ProtocolVariant,
    pub setpoint_range: SetpointRange,

    /// Consecutive failed exchanges tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::default(),
            setpoint_range: SetpointRange::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// What was sent last and is still waiting for an answer.
#[derive(Clone, Copy, Debug)]
struct Outstanding {
    frame: CommandFrame,

    /// `None` for polls.
    revision: Option<u64>,
}

pub struct DeviceSync {
    encoder: FrameEncoder,
    max_attempts: u32,

    desired: DesiredState,
    observed: Option<Telemetry>,

    /// `desired` encoded as a Set frame, once it has been changed.
    command: Option<CommandFrame>,

    phase: SyncPhase,

    /// Bumped on every accepted change of `desired`.
    revision: u64,
    acknowledged: u64,

    outstanding: Option<Outstanding>,
    failures: u32,
}

impl DeviceSync {
    pub fn new(settings: SyncSettings, desired: DesiredState) -> Self {
        Self {
            encoder: FrameEncoder::new(settings.variant, settings.setpoint_range),
            max_attempts: settings.max_attempts,
            desired,
            observed: None,
            command: None,
            phase: SyncPhase::Idle,
            revision: 0,
            acknowledged: 0,
            outstanding: None,
            failures: 0,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    /// The most recently validated telemetry, if any.
    pub fn observed(&self) -> Option<&Telemetry> {
        self.observed.as_ref()
    }

    /// Consecutive failed exchanges so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// `true` while a desired state has not been acknowledged by the unit.
    pub fn is_pending(&self) -> bool {
        self.revision != self.acknowledged
    }

    /// Replace the desired state.
    ///
    /// The state is checked against the encoder up front, so an unencodable state is
    /// rejected here and leaves everything untouched.
    pub fn set_desired(&mut self, desired: DesiredState) -> Result<(), EncodeError> {
        let command = self.encoder.encode_command(&desired, CommandType::Set)?;

        self.desired = desired;
        self.command = Some(command);
        self.revision += 1;

        if self.phase == SyncPhase::Idle {
            self.phase = SyncPhase::Dirty;
        }

        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), EncodeError> {
        self.set_desired(DesiredState { mode, ..self.desired })
    }

    pub fn set_fan(&mut self, fan: FanSpeed) -> Result<(), EncodeError> {
        self.set_desired(DesiredState { fan, ..self.desired })
    }

    pub fn set_setpoint(&mut self, setpoint: u8) -> Result<(), EncodeError> {
        self.set_desired(DesiredState { setpoint, ..self.desired })
    }

    pub fn set_mode_flags(&mut self, mode_flags: ModeFlags) -> Result<(), EncodeError> {
        self.set_desired(DesiredState { mode_flags, ..self.desired })
    }

    /// The frame to transmit this tick, or `None` once unreachable.
    ///
    /// A frame that has not been answered yet is returned again unchanged, except an
    /// unanswered poll, which a pending change replaces.
    pub fn next_frame(&mut self) -> Option<CommandFrame> {
        if let Some(outstanding) = self.outstanding {
            let superseded = outstanding.revision.is_none() && self.phase == SyncPhase::Dirty;

            if !superseded {
                return Some(outstanding.frame);
            }
        }

        let outstanding = match (self.phase, self.command) {
            (SyncPhase::Unreachable, _) => return None,

            (SyncPhase::Dirty | SyncPhase::InFlight, Some(frame)) => {
                self.phase = SyncPhase::InFlight;

                Outstanding {
                    frame,
                    revision: Some(self.revision),
                }
            }

            _ => Outstanding {
                frame: self.encoder.encode_query(),
                revision: None,
            },
        };

        self.outstanding = Some(outstanding);

        Some(outstanding.frame)
    }

    /// Fold the outcome of the last exchange back into the state.
    pub fn reconcile(&mut self, reply: Result<Telemetry, ExchangeError>) -> TickOutcome {
        match reply {
            Ok(telemetry) => {
                self.observed = Some(telemetry);
                self.failures = 0;

                let outstanding = self.outstanding.take();

                match (self.phase, outstanding.and_then(|o| o.revision)) {
                    (SyncPhase::InFlight, Some(revision)) => {
                        self.acknowledged = self.acknowledged.max(revision);

                        self.phase = if self.is_pending() {
                            SyncPhase::Dirty
                        } else {
                            SyncPhase::Idle
                        };

                        TickOutcome::Acknowledged
                    }
                    _ => TickOutcome::Refreshed,
                }
            }

            Err(error) => {
                if self.phase == SyncPhase::Unreachable {
                    return TickOutcome::Unreachable;
                }

                self.failures += 1;

                if self.failures >= self.max_attempts {
                    self.phase = SyncPhase::Unreachable;
                    self.outstanding = None;

                    return TickOutcome::Unreachable;
                }

                TickOutcome::Retry {
                    attempt: self.failures,
                    error,
                }
            }
        }
    }

    /// Leave [`SyncPhase::Unreachable`] and start over.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.outstanding = None;

        self.phase = if self.is_pending() {
            SyncPhase::Dirty
        } else {
            SyncPhase::Idle
        };
    }
}

/// Drive one send/receive/reconcile cycle over `transport`.
pub fn tick<T: Transport>(sync: &mut DeviceSync, transport: &mut T) -> TickOutcome {
    let frame = match sync.next_frame() {
        Some(frame) => frame,
        None => return TickOutcome::Unreachable,
    };

    let reply = transport.transmit(&frame)
        .map_err(ExchangeError::from)
        .and_then(|bytes| Ok(decode_response(&bytes)?));

    sync.reconcile(reply)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::response::ResponseFrame;

    /// Replays scripted replies and records every frame sent.
    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Result<Vec<u8>, TransportError>>,
        sent: Vec<CommandFrame>,
    }

    impl Scripted {
        fn reply(&mut self, frame: ResponseFrame) {
            self.replies.push_back(Ok(frame.seal().unwrap().to_vec()));
        }

        fn corrupt(&mut self, frame: ResponseFrame) {
            let mut bytes = frame.seal().unwrap().to_vec();
            bytes[12] ^= 0x20;
            self.replies.push_back(Ok(bytes));
        }

        fn timeout(&mut self) {
            self.replies.push_back(Err(TransportError::Timeout));
        }
    }

    impl Transport for Scripted {
        fn transmit(&mut self, frame: &CommandFrame) -> Result<Vec<u8>, TransportError> {
            self.sent.push(*frame);
            self.replies.pop_front().unwrap_or(Err(TransportError::Timeout))
        }
    }

    fn status(mode: Mode, fan: FanSpeed) -> ResponseFrame {
        ResponseFrame {
            response_type: 0xc0,
            mode: u8::try_from(mode).unwrap(),
            fan: u8::try_from(fan).unwrap(),
            setpoint: 72,
            current: 0xff,
            ..Default::default()
        }
    }

    fn sync() -> DeviceSync {
        DeviceSync::new(SyncSettings::default(), DesiredState::default())
    }

    #[test]
    fn test_idle_polls() {
        let mut sync = sync();
        let mut link = Scripted::default();
        link.reply(status(Mode::Off, FanSpeed::Auto));

        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Refreshed));
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(link.sent, vec![CommandFrame::query()]);
        assert_eq!(sync.observed().unwrap().mode, Mode::Off);
    }

    #[test]
    fn test_set_cool_high() {
        let mut sync = sync();
        let mut link = Scripted::default();

        sync.set_mode(Mode::Cool).unwrap();
        sync.set_fan(FanSpeed::High).unwrap();
        assert_eq!(sync.phase(), SyncPhase::Dirty);

        link.reply(status(Mode::Cool, FanSpeed::High));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Acknowledged));

        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert!(!sync.is_pending());
        assert_eq!(link.sent.len(), 1);
        assert_eq!(link.sent[0].command_type(), Some(CommandType::Set));
        assert_eq!(link.sent[0].as_bytes()[7], 0x01);
        assert_eq!(link.sent[0].as_bytes()[11], 0x88);

        let observed = sync.observed().unwrap();
        assert_eq!(observed.mode, Mode::Cool);
        assert_eq!(observed.fan, FanSpeed::High);
    }

    #[test]
    fn test_in_flight_between_send_and_reply() {
        let mut sync = sync();
        sync.set_mode(Mode::Heat).unwrap();

        let frame = sync.next_frame().unwrap();
        assert_eq!(frame.command_type(), Some(CommandType::Set));
        assert_eq!(sync.phase(), SyncPhase::InFlight);

        // nothing answered yet: the same frame goes out again
        assert_eq!(sync.next_frame(), Some(frame));
    }

    #[test]
    fn test_checksum_failure_retransmits_same_frame() {
        let mut sync = sync();
        let mut link = Scripted::default();

        sync.set_mode(Mode::Cool).unwrap();
        sync.set_fan(FanSpeed::High).unwrap();

        link.corrupt(status(Mode::Cool, FanSpeed::High));
        match tick(&mut sync, &mut link) {
            TickOutcome::Retry { attempt: 1, error: ExchangeError::Parse(ParseError::ChecksumMismatch { .. }) } => (),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sync.phase(), SyncPhase::InFlight);
        assert!(sync.observed().is_none());

        link.reply(status(Mode::Cool, FanSpeed::High));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Acknowledged));

        assert_eq!(link.sent.len(), 2);
        assert_eq!(link.sent[0], link.sent[1]);
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(sync.failures(), 0);
    }

    #[test]
    fn test_failed_refresh_keeps_observed() {
        let mut sync = sync();
        let mut link = Scripted::default();

        link.reply(status(Mode::Dry, FanSpeed::Low));
        link.corrupt(status(Mode::Heat, FanSpeed::Low));
        link.timeout();

        tick(&mut sync, &mut link);
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Retry { attempt: 1, .. }));
        assert!(matches!(
            tick(&mut sync, &mut link),
            TickOutcome::Retry { attempt: 2, error: ExchangeError::Transport(TransportError::Timeout) }
        ));

        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(sync.observed().unwrap().mode, Mode::Dry);
    }

    #[test]
    fn test_unreachable_after_max_attempts() {
        let settings = SyncSettings { max_attempts: 3, ..Default::default() };
        let mut sync = DeviceSync::new(settings, DesiredState::default());
        let mut link = Scripted::default();

        sync.set_mode(Mode::Cool).unwrap();

        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Retry { attempt: 1, .. }));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Retry { attempt: 2, .. }));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Unreachable));
        assert_eq!(sync.phase(), SyncPhase::Unreachable);

        // terminal: nothing more is sent
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Unreachable));
        assert_eq!(link.sent.len(), 3);

        sync.reset();
        assert_eq!(sync.phase(), SyncPhase::Dirty);

        link.reply(status(Mode::Cool, FanSpeed::Auto));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Acknowledged));
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_reset_without_pending_change() {
        let settings = SyncSettings { max_attempts: 1, ..Default::default() };
        let mut sync = DeviceSync::new(settings, DesiredState::default());
        let mut link = Scripted::default();

        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Unreachable));

        sync.reset();
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_change_while_in_flight_is_resent() {
        let mut sync = sync();
        let mut link = Scripted::default();

        sync.set_mode(Mode::Cool).unwrap();
        let first = sync.next_frame().unwrap();

        sync.set_fan(FanSpeed::Low).unwrap();
        assert_eq!(sync.phase(), SyncPhase::InFlight);

        let reply = status(Mode::Cool, FanSpeed::Auto).seal().unwrap();
        assert!(matches!(sync.reconcile(Ok(decode_response(&reply).unwrap())), TickOutcome::Acknowledged));
        assert_eq!(sync.phase(), SyncPhase::Dirty);

        link.reply(status(Mode::Cool, FanSpeed::Low));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Acknowledged));
        assert_ne!(link.sent[0], first);
        assert_eq!(link.sent[0].as_bytes()[7], 0x04);
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_change_after_failed_poll_sends_set() {
        let mut sync = sync();
        let mut link = Scripted::default();

        link.timeout();
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Retry { attempt: 1, .. }));
        assert_eq!(sync.phase(), SyncPhase::Idle);

        sync.set_mode(Mode::Cool).unwrap();
        assert_eq!(sync.phase(), SyncPhase::Dirty);

        link.reply(status(Mode::Cool, FanSpeed::Auto));
        assert!(matches!(tick(&mut sync, &mut link), TickOutcome::Acknowledged));

        assert_eq!(link.sent[0].command_type(), Some(CommandType::Query));
        assert_eq!(link.sent[1].command_type(), Some(CommandType::Set));
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert!(!sync.is_pending());
    }

    #[test]
    fn test_rejected_change_leaves_state() {
        let mut sync = sync();

        assert_eq!(
            sync.set_setpoint(200),
            Err(EncodeError::TemperatureOutOfRange { value: 200, min: 60, max: 90 })
        );
        assert_eq!(sync.set_mode(Mode::Unknown(0x33)), Err(EncodeError::UnsupportedMode(0x33)));
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(sync.desired(), &DesiredState::default());
    }
}
