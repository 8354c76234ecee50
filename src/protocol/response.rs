use std::fmt;

use packed_struct::prelude::*;

use super::checksum;
use super::constants::*;
use super::unit::{fault_description, Capabilities, FanSpeed, Mode, ModeFlags, OperationFlags};

/// The 32 byte response sent by the unit to every command or query.
///
/// Temperatures are raw bytes as reported by the unit; no conversion is applied.
#[derive(PackedStruct, Clone, Debug, Default, PartialEq, Eq)]
#[packed_struct(bit_numbering="msb0", size_bytes="32")]
pub struct ResponseFrame {
    #[packed_field(bytes="0")]
    pub start: u8,

    /// Echo of the command type that was answered.
    #[packed_field(bytes="1")]
    pub response_type: u8,

    #[packed_field(bytes="2")]
    pub direction: u8,

    /// Destination/source bytes.
    #[packed_field(bytes="3..=5")]
    pub routing: [u8; 3],

    #[packed_field(bytes="6")]
    pub unknown_byte6: u8,

    #[packed_field(bytes="7")]
    pub capabilities: u8,

    #[packed_field(bytes="8")]
    pub mode: u8,

    #[packed_field(bytes="9")]
    pub fan: u8,

    #[packed_field(bytes="10")]
    pub setpoint: u8,

    /// T1: indoor inlet air
    #[packed_field(bytes="11")]
    pub inlet_temp: u8,

    /// T2A
    #[packed_field(bytes="12")]
    pub coil_temp_a: u8,

    /// T2B
    #[packed_field(bytes="13")]
    pub coil_temp_b: u8,

    /// T3: outside/exhaust air
    #[packed_field(bytes="14")]
    pub outside_temp: u8,

    /// `0xff` when the unit has no current sensor.
    #[packed_field(bytes="15")]
    pub current: u8,

    #[packed_field(bytes="16")]
    pub unknown_byte16: u8,

    #[packed_field(bytes="17")]
    pub timer_start: u8,

    #[packed_field(bytes="18")]
    pub timer_stop: u8,

    #[packed_field(bytes="19")]
    pub unknown_byte19: u8,

    #[packed_field(bytes="20")]
    pub mode_flags: u8,

    #[packed_field(bytes="21")]
    pub operation_flags: u8,

    #[packed_field(bytes="22..=23", endian="lsb")]
    pub error_code: u16,

    #[packed_field(bytes="24..=25", endian="lsb")]
    pub protection_code: u16,

    /// Communication module (CCM) error flags.
    #[packed_field(bytes="26")]
    pub comm_module_errors: u8,

    #[packed_field(bytes="27..=29")]
    pub reserved: [u8; 3],

    #[packed_field(bytes="30")]
    pub checksum: u8,

    #[packed_field(bytes="31")]
    pub end: u8,
}

impl ResponseFrame {
    /// Pack into wire bytes with the start/end markers and checksum filled in.
    pub fn seal(&self) -> Result<[u8; RESPONSE_FRAME_LEN], PackingError> {
        let mut bytes = self.pack()?;

        bytes[0] = FRAME_START;
        bytes[RESPONSE_FRAME_LEN - 1] = FRAME_END;
        checksum::seal(&mut bytes);

        Ok(bytes)
    }
}

/// A validated, typed response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Telemetry {
    pub response_type: u8,

    pub capabilities: Capabilities,

    pub mode: Mode,
    pub fan: FanSpeed,
    pub setpoint: u8,

    pub inlet_temp: u8,
    pub coil_temp_a: u8,
    pub coil_temp_b: u8,
    pub outside_temp: u8,

    /// `None` when the unit reports it does not measure current.
    pub current: Option<u8>,

    pub timer_start: u8,
    pub timer_stop: u8,

    pub mode_flags: ModeFlags,
    pub operation_flags: OperationFlags,

    pub error_code: u16,
    pub protection_code: u16,

    pub comm_module_errors: u8,
}

impl Telemetry {
    pub fn has_fault(&self) -> bool {
        self.error_code != 0 || self.protection_code != 0 || self.comm_module_errors != 0
    }

    /// Human readable description of `error_code`, if it is a well known one.
    pub fn fault_description(&self) -> Option<&'static str> {
        fault_description(self.error_code)
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {}, fan {}, setpoint {}, flags {}", self.mode, self.fan, self.setpoint, self.mode_flags)?;
        write!(
            f,
            ", inlet {:#04x}, coil {:#04x}/{:#04x}, outside {:#04x}",
            self.inlet_temp, self.coil_temp_a, self.coil_temp_b, self.outside_temp
        )?;

        match self.current {
            Some(current) => write!(f, ", current {current}")?,
            None => write!(f, ", current n/a")?,
        }

        if self.has_fault() {
            let desc = self.fault_description().unwrap_or("unknown");
            write!(
                f,
                ", fault {:#06x} ({desc}), protection {:#06x}, comm errors {}",
                self.error_code, self.protection_code, self.comm_module_errors
            )?;
        }

        Ok(())
    }
}

impl From<&ResponseFrame> for Telemetry {
    fn from(frame: &ResponseFrame) -> Self {
        Self {
            response_type: frame.response_type,
            capabilities: Capabilities::from_byte(frame.capabilities),
            mode: Mode::from(frame.mode),
            fan: FanSpeed::from(frame.fan),
            setpoint: frame.setpoint,
            inlet_temp: frame.inlet_temp,
            coil_temp_a: frame.coil_temp_a,
            coil_temp_b: frame.coil_temp_b,
            outside_temp: frame.outside_temp,
            current: (frame.current != CURRENT_NOT_MEASURED).then_some(frame.current),
            timer_start: frame.timer_start,
            timer_stop: frame.timer_stop,
            mode_flags: ModeFlags::from_byte(frame.mode_flags),
            operation_flags: OperationFlags::from_byte(frame.operation_flags),
            error_code: frame.error_code,
            protection_code: frame.protection_code,
            comm_module_errors: frame.comm_module_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_layout() {
        let frame = ResponseFrame {
            response_type: 0xc0,
            mode: 0x88,
            fan: 0x04,
            error_code: 0x0102,
            protection_code: 0xa0b0,
            ..Default::default()
        };

        let bytes = frame.seal().unwrap();

        assert_eq!(bytes[0], 0xaa);
        assert_eq!(bytes[1], 0xc0);
        assert_eq!(bytes[8], 0x88);
        assert_eq!(bytes[9], 0x04);
        assert_eq!(bytes[22], 0x02);
        assert_eq!(bytes[23], 0x01);
        assert_eq!(bytes[24], 0xb0);
        assert_eq!(bytes[25], 0xa0);
        assert_eq!(bytes[31], 0x55);
        assert!(checksum::verify(&bytes));
    }

    #[test]
    fn test_current_not_measured() {
        let frame = ResponseFrame { current: 0xff, ..Default::default() };
        assert_eq!(Telemetry::from(&frame).current, None);

        let frame = ResponseFrame { current: 12, ..Default::default() };
        assert_eq!(Telemetry::from(&frame).current, Some(12));
    }

    #[test]
    fn test_faults() {
        let frame = ResponseFrame { error_code: 0x07, ..Default::default() };
        let telemetry = Telemetry::from(&frame);

        assert!(telemetry.has_fault());
        assert_eq!(telemetry.fault_description(), Some("compressor overcurrent"));
        assert!(!Telemetry::from(&ResponseFrame::default()).has_fault());
    }

    #[test]
    fn test_display() {
        let frame = ResponseFrame { mode: 0x88, fan: 0x01, setpoint: 70, current: 0xff, ..Default::default() };
        let line = Telemetry::from(&frame).to_string();

        assert!(line.starts_with("mode cool, fan high, setpoint 70, flags none"));
        assert!(line.contains("current n/a"));
        assert!(!line.contains("fault"));

        let frame = ResponseFrame { error_code: 0x06, ..frame };
        assert!(Telemetry::from(&frame).to_string().contains("fault 0x0006 (compressor overload)"));
    }
}
