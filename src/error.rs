//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.
//!
//! Protocol discards (missing identifiers, duplicate retransmissions, no
//! configured link) are not errors: processors simply produce no reply.

use std::net::IpAddr;

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or lease files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed hex string in the configuration (server DUID, filter data).
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Malformed DHCPv4 or DHCPv6 packet received.
    ///
    /// This includes packets that are too short, have invalid magic cookies,
    /// invalid option lengths, or other protocol violations.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// No pool on the client's link yields a free address or prefix.
    ///
    /// Processors translate this into a NoAddrsAvail / NoPrefixAvail status.
    #[error("No available addresses or prefixes in pool")]
    PoolExhausted,

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., overlapping pools).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 or 547 without administrator
    /// privileges, or when the specified network interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The lease store backend failed.
    ///
    /// Treated as an allocation failure for the request that hit it.
    #[error("Lease store error: {0}")]
    Store(String),

    /// No configured link matches the address a packet arrived on.
    #[error("No link configured for {0}")]
    NoLink(IpAddr),

    /// No lease exists for the specified address.
    #[error("No lease found for {0}")]
    LeaseNotFound(IpAddr),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
