//! DHCPv6 wire format.

pub mod message;
pub mod options;

pub use message::{Dhcp6Message, MessageType};
pub use options::{Dhcp6Option, Ia, IaAddress, IaPrefix, StatusCode};
