//! tensorlink-core: wire format, sender-side framing, and configuration.
//! All other Tensorlink crates depend on this one.

pub mod config;
pub mod framing;
pub mod wire;

pub use config::TensorlinkConfig;
pub use wire::{DatagramHeader, StreamHeader};
