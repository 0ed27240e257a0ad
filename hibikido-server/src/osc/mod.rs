//! OSC control protocol: inbound command parsing and datagram transport

pub mod command;
pub mod transport;

pub use command::{Command, CommandError};
pub use transport::{OscTransport, Outbound, StatsSnapshot};
