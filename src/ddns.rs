//! Dynamic DNS hand-off.
//!
//! After a binding is committed the processors describe the DNS change in a
//! [`DdnsUpdate`] and pass it to a [`DdnsUpdater`]. The server never waits
//! for the update; completion is only logged.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::lease::encode_client_id;

/// FQDN option S bit: the server should perform the forward update.
pub const FQDN_FLAG_S: u8 = 0x01;
/// DHCPv6 FQDN N bit: no server updates at all.
pub const FQDN_V6_FLAG_N: u8 = 0x04;
/// DHCPv4 FQDN N bit.
pub const FQDN_V4_FLAG_N: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdnsUpdate {
    pub link: String,
    pub address: IpAddr,
    pub fqdn: String,
    pub client_id: Vec<u8>,
    pub valid_lifetime: u32,
    /// Update the A/AAAA record.
    pub forward: bool,
    /// Update the PTR record.
    pub reverse: bool,
}

impl DdnsUpdate {
    /// Which updates the server performs for FQDN option `flags`. A client
    /// setting N gets neither; otherwise the reverse record is always ours
    /// and the forward record only when the client sets S.
    pub fn directions(flags: u8, no_update_flag: u8) -> (bool, bool) {
        if flags & no_update_flag != 0 {
            return (false, false);
        }
        (flags & FQDN_FLAG_S != 0, true)
    }

    /// Appends `domain` to unqualified names.
    pub fn qualify(name: &str, domain: &str) -> String {
        let name = name.trim_end_matches('.');
        if name.contains('.') || domain.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", name, domain.trim_matches('.'))
        }
    }
}

impl fmt::Display for DdnsUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (forward={}, reverse={}, lifetime={}s)",
            self.fqdn, self.address, self.forward, self.reverse, self.valid_lifetime
        )
    }
}

/// Performs DNS updates for committed bindings.
#[async_trait]
pub trait DdnsUpdater: Send + Sync + fmt::Debug {
    /// Resolves when the update has completed.
    async fn update(&self, update: DdnsUpdate) -> Result<()>;
}

/// Updater that only records what would be sent.
#[derive(Debug, Default)]
pub struct LoggingDdnsUpdater;

#[async_trait]
impl DdnsUpdater for LoggingDdnsUpdater {
    async fn update(&self, update: DdnsUpdate) -> Result<()> {
        info!(
            "DDNS update on link {} for client {}: {}",
            update.link,
            encode_client_id(&update.client_id),
            update
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions_follow_flags() {
        assert_eq!(DdnsUpdate::directions(0x01, FQDN_V6_FLAG_N), (true, true));
        assert_eq!(DdnsUpdate::directions(0x00, FQDN_V6_FLAG_N), (false, true));
        assert_eq!(DdnsUpdate::directions(0x04, FQDN_V6_FLAG_N), (false, false));
        assert_eq!(DdnsUpdate::directions(0x09, FQDN_V4_FLAG_N), (false, false));
    }

    #[test]
    fn test_qualify() {
        assert_eq!(DdnsUpdate::qualify("host", "example.com"), "host.example.com");
        assert_eq!(DdnsUpdate::qualify("host.lab.", "example.com"), "host.lab");
        assert_eq!(DdnsUpdate::qualify("host", ""), "host");
    }

    #[tokio::test]
    async fn test_logging_updater_completes() {
        let update = DdnsUpdate {
            link: "lan".to_string(),
            address: "2001:db8::10".parse().unwrap(),
            fqdn: "host.example.com".to_string(),
            client_id: vec![0, 1],
            valid_lifetime: 3600,
            forward: true,
            reverse: true,
        };
        assert!(LoggingDdnsUpdater.update(update).await.is_ok());
    }
}
