pub mod checksum;
pub mod codec;
pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod response;
pub mod unit;
