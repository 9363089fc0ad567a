//! DHCPv4 wire format.

pub mod options;
pub mod packet;

pub use options::{Dhcp4Option, MessageType, OptionCode};
pub use packet::Dhcp4Packet;
