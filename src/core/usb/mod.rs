//! USB transport to the probe
//!
//! - **protocol**: firmware constants (IDs, function numbers, baud table)
//! - **framer**: 3-byte chunking and 128-byte response reassembly
//! - **channel**: device enumeration, handle ownership, control transfers

pub mod channel;
pub mod framer;
pub mod protocol;

#[cfg(test)]
pub mod mock;

pub use channel::{ControlChannel, RusbChannel};
pub use protocol::BaudRate;
