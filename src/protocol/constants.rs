pub const FRAME_START: u8 = 0xaa;
pub const FRAME_END: u8 = 0x55;

/// Length of a command or query frame sent to the unit.
pub const COMMAND_FRAME_LEN: usize = 16;

/// Length of a response frame sent by the unit.
pub const RESPONSE_FRAME_LEN: usize = 32;

/// Marker written to byte 4 of every outbound frame.
pub const UNIT_DIRECTION: u8 = 0x80;

pub const SERVER_ID: u8 = 0x00;
pub const CLIENT_ID: u8 = 0x00;

pub const CONTROL_BYTE_SET: u8 = 0x3c;
pub const CONTROL_BYTE_QUERY: u8 = 0x3f;

/// Line settings: 4800 baud, 8N1.
pub const BAUD_RATE: u32 = 4800;

/// Current reading reported when the unit has no current sensor.
pub const CURRENT_NOT_MEASURED: u8 = 0xff;
