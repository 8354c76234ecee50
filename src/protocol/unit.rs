use std::fmt;
use std::str::FromStr;

use strum_macros::EnumString;

use super::error::EncodeError;

/// Operating mode byte, as carried in both command and response frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Mode {
    Off,
    #[strum(serialize = "auto")]
    AutoPrimary,
    AutoAlt,
    Cool,
    Dry,
    Heat,
    FanOnly,

    /// A mode byte this crate has no name for.
    #[strum(disabled)]
    Unknown(u8),
}

impl TryFrom<Mode> for u8 {
    type Error = EncodeError;

    /// The wire byte for `mode`. [`Mode::Unknown`] is never sent back to the unit.
    fn try_from(mode: Mode) -> Result<Self, Self::Error> {
        match mode {
            Mode::Off => Ok(0x00),
            Mode::AutoPrimary => Ok(0x91),
            Mode::AutoAlt => Ok(0x80),
            Mode::Cool => Ok(0x88),
            Mode::Dry => Ok(0x82),
            Mode::Heat => Ok(0x84),
            Mode::FanOnly => Ok(0x81),
            Mode::Unknown(byte) => Err(EncodeError::UnsupportedMode(byte)),
        }
    }
}

impl Mode {
    pub fn is_auto(self) -> bool {
        matches!(self, Mode::AutoPrimary | Mode::AutoAlt)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Off => write!(f, "off"),
            Mode::AutoPrimary | Mode::AutoAlt => write!(f, "auto"),
            Mode::Cool => write!(f, "cool"),
            Mode::Dry => write!(f, "dry"),
            Mode::Heat => write!(f, "heat"),
            Mode::FanOnly => write!(f, "fan-only"),
            Mode::Unknown(byte) => write!(f, "unknown ({byte:#04x})"),
        }
    }
}

impl From<u8> for Mode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Mode::Off,
            0x91 => Mode::AutoPrimary,
            0x80 => Mode::AutoAlt,
            0x88 => Mode::Cool,
            0x82 => Mode::Dry,
            0x84 => Mode::Heat,
            0x81 => Mode::FanOnly,
            other => Mode::Unknown(other),
        }
    }
}

/// Fan speed byte.
///
/// Low is `0x04`. `0x03` is medium-low, which only some units support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum FanSpeed {
    Auto,
    High,
    Medium,
    MediumLow,
    Low,

    #[strum(disabled)]
    Unknown(u8),
}

impl TryFrom<FanSpeed> for u8 {
    type Error = EncodeError;

    fn try_from(fan: FanSpeed) -> Result<Self, Self::Error> {
        match fan {
            FanSpeed::Auto => Ok(0x80),
            FanSpeed::High => Ok(0x01),
            FanSpeed::Medium => Ok(0x02),
            FanSpeed::MediumLow => Ok(0x03),
            FanSpeed::Low => Ok(0x04),
            FanSpeed::Unknown(byte) => Err(EncodeError::UnsupportedFan(byte)),
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanSpeed::Auto => write!(f, "auto"),
            FanSpeed::High => write!(f, "high"),
            FanSpeed::Medium => write!(f, "medium"),
            FanSpeed::MediumLow => write!(f, "medium-low"),
            FanSpeed::Low => write!(f, "low"),
            FanSpeed::Unknown(byte) => write!(f, "unknown ({byte:#04x})"),
        }
    }
}

impl From<u8> for FanSpeed {
    fn from(value: u8) -> Self {
        match value {
            0x80 => FanSpeed::Auto,
            0x01 => FanSpeed::High,
            0x02 => FanSpeed::Medium,
            0x03 => FanSpeed::MediumLow,
            0x04 => FanSpeed::Low,
            other => FanSpeed::Unknown(other),
        }
    }
}

/// Auxiliary operating conditions.
///
/// Ventilation is encoded as the whole byte `0x88`, which overlaps the bits used by
/// the other flags, so it is matched exactly and excludes the others.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub eco: bool,
    pub aux_heat: bool,
    pub swing: bool,
    pub vent: bool,
}

impl ModeFlags {
    pub const ECO: u8 = 0x01;
    pub const AUX_HEAT: u8 = 0x02;
    pub const SWING: u8 = 0x04;
    pub const VENT: u8 = 0x88;

    pub fn from_byte(value: u8) -> Self {
        if value == Self::VENT {
            return Self { vent: true, ..Default::default() };
        }

        Self {
            eco: value & Self::ECO != 0,
            aux_heat: value & Self::AUX_HEAT != 0,
            swing: value & Self::SWING != 0,
            vent: false,
        }
    }

    pub fn to_byte(self) -> u8 {
        if self.vent {
            return Self::VENT;
        }

        let mut value = 0;
        if self.eco { value |= Self::ECO }
        if self.aux_heat { value |= Self::AUX_HEAT }
        if self.swing { value |= Self::SWING }
        value
    }

    pub fn is_empty(self) -> bool {
        self == Self::default()
    }
}

impl fmt::Display for ModeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.eco, "eco"),
            (self.aux_heat, "aux-heat"),
            (self.swing, "swing"),
            (self.vent, "vent"),
        ];

        let set: Vec<&str> = names.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();

        if set.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", set.join(","))
        }
    }
}

impl FromStr for ModeFlags {
    type Err = strum::ParseError;

    /// Comma separated flag names, or `none`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::default();

        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "none" => (),
                "eco" => flags.eco = true,
                "aux-heat" => flags.aux_heat = true,
                "swing" => flags.swing = true,
                "vent" => flags.vent = true,
                _ => return Err(strum::ParseError::VariantNotFound),
            }
        }

        Ok(flags)
    }
}

/// Response byte 21.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationFlags {
    pub water_pump: bool,
    pub water_lock: bool,
}

impl OperationFlags {
    pub const WATER_PUMP: u8 = 0x04;
    pub const WATER_LOCK: u8 = 0x80;

    pub fn from_byte(value: u8) -> Self {
        Self {
            water_pump: value & Self::WATER_PUMP != 0,
            water_lock: value & Self::WATER_LOCK != 0,
        }
    }
}

/// Optional hardware reported by the unit in response byte 7.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub extended_temp_sensor: bool,
    pub swing: bool,
}

impl Capabilities {
    pub const EXTENDED_TEMP: u8 = 0x80;
    pub const SWING: u8 = 0x10;

    pub fn from_byte(value: u8) -> Self {
        Self {
            extended_temp_sensor: value & Self::EXTENDED_TEMP != 0,
            swing: value & Self::SWING != 0,
        }
    }
}

/// The state the caller wants the unit to be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DesiredState {
    pub mode: Mode,

    pub fan: FanSpeed,

    /// Raw setpoint byte, in the unit's configured temperature scale.
    pub setpoint: u8,

    /// Only encodable on variant B.
    pub mode_flags: ModeFlags,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            fan: FanSpeed::Auto,
            setpoint: 72,
            mode_flags: ModeFlags::default(),
        }
    }
}

/// Commonly reported error codes. Codes are unit specific; these are the ones seen across
/// most air handlers.
pub fn fault_description(code: u16) -> Option<&'static str> {
    let desc = match code {
        0x00 => "no error",
        0x01 => "indoor/outdoor communication error",
        0x02 => "indoor temperature sensor fault",
        0x03 => "indoor coil temperature sensor fault",
        0x04 => "outdoor temperature sensor fault",
        0x05 => "outdoor coil temperature sensor fault",
        0x06 => "compressor overload",
        0x07 => "compressor overcurrent",
        0x08 => "system high pressure",
        0x09 => "system low pressure",
        0x0a => "compressor phase error",
        0x0b => "outdoor fan motor error",
        0x0c => "indoor fan motor error",
        0x0d => "EEPROM error",
        0x0e => "power voltage error",
        0x0f => "freeze protection activated",
        _ => return None,
    };

    Some(desc)
}
