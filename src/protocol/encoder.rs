use std::ops::RangeInclusive;

use packed_struct::prelude::*;

use super::checksum;
use super::constants::*;
use super::decoder::validate_envelope;
use super::error::{EncodeError, ParseError};
use super::layout::{Field, ProtocolVariant, VariantLayout};
use super::unit::{DesiredState, FanSpeed, Mode, ModeFlags};

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    Query = 0xc0,
    Set = 0xc3,
    Lock = 0xcc,
    Unlock = 0xcd,
}

/// The status poll. All payload bytes are zero, so the checksum never changes.
const QUERY_FRAME: [u8; COMMAND_FRAME_LEN] = [
    FRAME_START, 0xc0, SERVER_ID, CLIENT_ID, UNIT_DIRECTION, CLIENT_ID, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, CONTROL_BYTE_QUERY, 0x81, FRAME_END,
];

/// A complete 16 byte command or query frame, checksum included.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; COMMAND_FRAME_LEN]);

impl CommandFrame {
    pub const fn query() -> Self {
        Self(QUERY_FRAME)
    }

    /// Validate a received command frame (used when emulating a unit).
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        validate_envelope(bytes, COMMAND_FRAME_LEN)?;

        let mut frame = [0x00; COMMAND_FRAME_LEN];
        frame.copy_from_slice(bytes);

        Ok(Self(frame))
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_FRAME_LEN] {
        &self.0
    }

    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::from_primitive(self.0[1])
    }

    pub fn is_query(&self) -> bool {
        self.command_type() == Some(CommandType::Query)
    }

    /// Read the requested state back out of a control frame.
    pub fn desired_state(&self, layout: &VariantLayout) -> DesiredState {
        let byte_at = |field| layout.offset_of(field).ok().map(|idx| self.0[idx]);

        DesiredState {
            mode: byte_at(Field::Mode).map(Mode::from).unwrap_or(Mode::Off),
            fan: byte_at(Field::Fan).map(FanSpeed::from).unwrap_or(FanSpeed::Auto),
            setpoint: byte_at(Field::Temperature).unwrap_or_default(),
            mode_flags: byte_at(Field::ModeFlags).map(ModeFlags::from_byte).unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandFrame({:02x?})", &self.0[..])
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Setpoints the unit will be asked to hold.
///
/// The wire allows any byte; practical units accept a much narrower band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetpointRange {
    pub min: u8,
    pub max: u8,
}

impl SetpointRange {
    pub fn contains(&self, value: u8) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for SetpointRange {
    fn default() -> Self {
        Self { min: 60, max: 90 }
    }
}

impl From<RangeInclusive<u8>> for SetpointRange {
    fn from(range: RangeInclusive<u8>) -> Self {
        Self { min: *range.start(), max: *range.end() }
    }
}

/// Builds outbound frames for one protocol variant.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    layout: VariantLayout,
    setpoint_range: SetpointRange,
}

impl FrameEncoder {
    pub fn new(variant: ProtocolVariant, setpoint_range: SetpointRange) -> Self {
        Self {
            layout: VariantLayout::new(variant),
            setpoint_range,
        }
    }

    pub fn layout(&self) -> &VariantLayout {
        &self.layout
    }

    pub fn encode_query(&self) -> CommandFrame {
        CommandFrame::query()
    }

    /// Encode `desired` as a control frame of type `command_type`.
    ///
    /// A `Query` carries no payload and yields the constant query frame.
    pub fn encode_command(&self, desired: &DesiredState, command_type: CommandType) -> Result<CommandFrame, EncodeError> {
        if command_type == CommandType::Query {
            return Ok(CommandFrame::query());
        }

        let mode = u8::try_from(desired.mode)?;
        let fan = u8::try_from(desired.fan)?;

        if !self.setpoint_range.contains(desired.setpoint) {
            return Err(EncodeError::TemperatureOutOfRange {
                value: desired.setpoint,
                min: self.setpoint_range.min,
                max: self.setpoint_range.max,
            });
        }

        let layout = &self.layout;
        let mut frame = [0x00; COMMAND_FRAME_LEN];

        frame[0] = FRAME_START;
        frame[layout.offset_of(Field::CommandType)?] = command_type.to_primitive();
        frame[layout.offset_of(Field::ServerId)?] = SERVER_ID;
        frame[layout.offset_of(Field::ClientId)?] = CLIENT_ID;
        frame[layout.offset_of(Field::Direction)?] = UNIT_DIRECTION;
        frame[layout.offset_of(Field::Fan)?] = fan;
        frame[layout.offset_of(Field::Temperature)?] = desired.setpoint;
        frame[layout.offset_of(Field::Timer1)?] = 0x00;
        frame[layout.offset_of(Field::Timer2)?] = 0x00;
        frame[layout.offset_of(Field::Mode)?] = mode;

        if layout.has(Field::ModeFlags) {
            frame[layout.offset_of(Field::ModeFlags)?] = desired.mode_flags.to_byte();
        } else if !desired.mode_flags.is_empty() {
            return Err(EncodeError::UnsupportedField(Field::ModeFlags));
        }

        frame[layout.offset_of(Field::Control)?] = CONTROL_BYTE_SET;
        frame[COMMAND_FRAME_LEN - 1] = FRAME_END;
        checksum::seal(&mut frame);

        Ok(CommandFrame(frame))
    }
}

/// The constant status poll for `variant`.
pub fn encode_query(_variant: ProtocolVariant) -> CommandFrame {
    CommandFrame::query()
}

/// Encode `desired` using the default setpoint range.
pub fn encode_command(desired: &DesiredState, command_type: CommandType, variant: ProtocolVariant) -> Result<CommandFrame, EncodeError> {
    FrameEncoder::new(variant, SetpointRange::default()).encode_command(desired, command_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cool_high() -> DesiredState {
        DesiredState {
            mode: Mode::Cool,
            fan: FanSpeed::High,
            setpoint: 72,
            mode_flags: ModeFlags::default(),
        }
    }

    #[test]
    fn test_query_literal() {
        let expected = [0xaa, 0xc0, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3f, 0x81, 0x55];

        assert_eq!(encode_query(ProtocolVariant::A).as_bytes(), &expected);
        assert_eq!(encode_query(ProtocolVariant::B).as_bytes(), &expected);
        assert!(checksum::verify(&expected));
        assert!(encode_query(ProtocolVariant::A).is_query());
    }

    #[test]
    fn test_encode_set_variant_a() {
        let frame = encode_command(&cool_high(), CommandType::Set, ProtocolVariant::A).unwrap();
        let bytes = frame.as_bytes();

        assert_eq!(bytes[0], 0xaa);
        assert_eq!(bytes[1], 0xc3);
        assert_eq!(bytes[4], 0x80);
        assert_eq!(bytes[6], 0x00);
        assert_eq!(bytes[7], 0x01);
        assert_eq!(bytes[8], 72);
        assert_eq!(bytes[9], 0x00);
        assert_eq!(bytes[10], 0x00);
        assert_eq!(bytes[11], 0x88);
        assert_eq!(bytes[12], 0x00);
        assert_eq!(bytes[13], 0x3c);
        assert_eq!(bytes[14], checksum::compute(bytes).unwrap());
        assert_eq!(bytes[15], 0x55);
        assert_eq!(frame.command_type(), Some(CommandType::Set));
    }

    #[test]
    fn test_encode_set_variant_b() {
        let mut desired = cool_high();
        desired.mode_flags.eco = true;
        desired.mode_flags.swing = true;

        let frame = encode_command(&desired, CommandType::Set, ProtocolVariant::B).unwrap();
        let bytes = frame.as_bytes();

        assert_eq!(bytes[6], 0x88);
        assert_eq!(bytes[11], 0x00);
        assert_eq!(bytes[12], 0x05);
        assert!(checksum::verify(bytes));
    }

    #[test]
    fn test_mode_flags_rejected_on_variant_a() {
        let mut desired = cool_high();
        desired.mode_flags.vent = true;

        assert_eq!(
            encode_command(&desired, CommandType::Set, ProtocolVariant::A),
            Err(EncodeError::UnsupportedField(Field::ModeFlags))
        );
    }

    #[test]
    fn test_every_named_state_encodes() {
        let modes = [Mode::Off, Mode::AutoPrimary, Mode::AutoAlt, Mode::Cool, Mode::Dry, Mode::Heat, Mode::FanOnly];
        let fans = [FanSpeed::Auto, FanSpeed::High, FanSpeed::Medium, FanSpeed::MediumLow, FanSpeed::Low];
        let range = SetpointRange::default();

        for variant in [ProtocolVariant::A, ProtocolVariant::B] {
            for mode in modes {
                for fan in fans {
                    for setpoint in [range.min, 72, range.max] {
                        let desired = DesiredState { mode, fan, setpoint, ..Default::default() };
                        let frame = encode_command(&desired, CommandType::Set, variant).unwrap();
                        let bytes = frame.as_bytes();

                        assert_eq!(bytes.len(), 16);
                        assert_eq!(bytes[0], 0xaa);
                        assert_eq!(bytes[15], 0x55);
                        assert!(checksum::verify(bytes));
                        assert_eq!(frame.desired_state(&VariantLayout::new(variant)), desired);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unknown_values_rejected() {
        let desired = DesiredState { mode: Mode::Unknown(0x42), ..cool_high() };
        assert_eq!(encode_command(&desired, CommandType::Set, ProtocolVariant::A), Err(EncodeError::UnsupportedMode(0x42)));

        let desired = DesiredState { fan: FanSpeed::Unknown(0x07), ..cool_high() };
        assert_eq!(encode_command(&desired, CommandType::Set, ProtocolVariant::A), Err(EncodeError::UnsupportedFan(0x07)));
    }

    #[test]
    fn test_setpoint_range() {
        let encoder = FrameEncoder::new(ProtocolVariant::A, (16..=30).into());

        let desired = DesiredState { setpoint: 31, ..cool_high() };
        assert_eq!(
            encoder.encode_command(&desired, CommandType::Set),
            Err(EncodeError::TemperatureOutOfRange { value: 31, min: 16, max: 30 })
        );

        let desired = DesiredState { setpoint: 16, ..cool_high() };
        assert!(encoder.encode_command(&desired, CommandType::Set).is_ok());
    }

    #[test]
    fn test_lock_unlock_and_query_types() {
        let lock = encode_command(&cool_high(), CommandType::Lock, ProtocolVariant::A).unwrap();
        assert_eq!(lock.as_bytes()[1], 0xcc);
        assert_eq!(lock.as_bytes()[13], 0x3c);

        let unlock = encode_command(&cool_high(), CommandType::Unlock, ProtocolVariant::A).unwrap();
        assert_eq!(unlock.command_type(), Some(CommandType::Unlock));

        let query = encode_command(&cool_high(), CommandType::Query, ProtocolVariant::A).unwrap();
        assert_eq!(query, CommandFrame::query());
    }

    #[test]
    fn test_parse_command_frame() {
        let frame = encode_command(&cool_high(), CommandType::Set, ProtocolVariant::A).unwrap();
        assert_eq!(CommandFrame::parse(frame.as_bytes()), Ok(frame));

        let mut bytes = *frame.as_bytes();
        bytes[8] = 70;
        assert!(matches!(CommandFrame::parse(&bytes), Err(ParseError::ChecksumMismatch { .. })));

        assert_eq!(
            CommandFrame::parse(&bytes[..15]),
            Err(ParseError::WrongLength { expected: 16, actual: 15 })
        );
    }
}
