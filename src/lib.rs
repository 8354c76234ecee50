pub mod config;
pub mod poller;
pub mod protocol;
pub mod sync;
pub mod transport;
