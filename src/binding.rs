//! Binding data model.
//!
//! A [`Binding`] is the server's view of one Identity Association (IA) of one
//! client on one link. It holds [`BindingObject`]s, each of which is a single
//! leased address or delegated prefix. Bindings are produced and mutated
//! only by the binding managers; processors read them to build replies.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::range::Range;

/// Lifetime value meaning "never expires" (RFC 3315 §5.6).
pub const INFINITE_LIFETIME: u32 = u32::MAX;

/// The kind of resource an IA holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IaType {
    /// DHCPv6 non-temporary addresses.
    Na,
    /// DHCPv6 temporary addresses.
    Ta,
    /// DHCPv6 delegated prefixes.
    Pd,
    /// DHCPv4 address. IA-ID is always zero.
    V4,
}

impl fmt::Display for IaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Na => write!(f, "IA_NA"),
            Self::Ta => write!(f, "IA_TA"),
            Self::Pd => write!(f, "IA_PD"),
            Self::V4 => write!(f, "V4"),
        }
    }
}

/// State of a leased address or prefix, and of the binding that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Available,
    /// Held for a client outside the normal offer/commit flow.
    Reserved,
    /// Advertised (v6) or offered (v4), awaiting the client's request.
    Offered,
    /// Committed to the client.
    Leased,
    Declined,
    Expired,
    Released,
}

impl LeaseState {
    /// True for states that occupy the pool member.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Reserved | Self::Offered | Self::Leased)
    }

    /// Ordering used when picking reusable leases: never-used rows first.
    pub fn reuse_rank(&self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Released => 1,
            Self::Expired => 2,
            Self::Offered => 3,
            Self::Declined => 4,
            Self::Reserved => 5,
            Self::Leased => 6,
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Offered => "offered",
            Self::Leased => "leased",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// Identity of an IA: client, IA type and IA-ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IaKey {
    pub client_id: Vec<u8>,
    pub ia_type: IaType,
    pub iaid: u32,
}

impl IaKey {
    pub fn new(client_id: &[u8], ia_type: IaType, iaid: u32) -> Self {
        Self {
            client_id: client_id.to_vec(),
            ia_type,
            iaid,
        }
    }
}

/// A raw option blob stored alongside a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOption {
    pub code: u16,
    pub data: Vec<u8>,
}

/// The thing a binding object leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingResource {
    /// A v4, NA or TA address.
    Address(IpAddr),
    /// A delegated v6 prefix.
    Prefix { prefix: Ipv6Addr, length: u8 },
}

impl BindingResource {
    /// The address used as the lease key.
    pub fn ip(&self) -> IpAddr {
        match self {
            Self::Address(ip) => *ip,
            Self::Prefix { prefix, .. } => IpAddr::V6(*prefix),
        }
    }

    pub fn prefix_length(&self) -> u8 {
        match self {
            Self::Address(IpAddr::V4(_)) => 32,
            Self::Address(IpAddr::V6(_)) => 128,
            Self::Prefix { length, .. } => *length,
        }
    }
}

impl fmt::Display for BindingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(ip) => write!(f, "{}", ip),
            Self::Prefix { prefix, length } => write!(f, "{}/{}", prefix, length),
        }
    }
}

/// Lifetimes granted to a binding object, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetimes {
    pub preferred: u32,
    pub valid: u32,
}

impl Lifetimes {
    pub const ZERO: Lifetimes = Lifetimes {
        preferred: 0,
        valid: 0,
    };

    pub fn new(preferred: u32, valid: u32) -> Self {
        Self { preferred, valid }
    }
}

/// End time recorded for infinite lifetimes (9999-12-31T23:59:59Z), chosen
/// so it survives a JSON round trip.
pub fn never() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn end_time(start: DateTime<Utc>, seconds: u32) -> DateTime<Utc> {
    if seconds == INFINITE_LIFETIME {
        return never();
    }
    start + TimeDelta::seconds(seconds as i64)
}

fn span_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    if end >= never() {
        return INFINITE_LIFETIME;
    }
    (end - start).num_seconds().clamp(0, (INFINITE_LIFETIME - 1) as i64) as u32
}

/// One leased address or prefix within a [`Binding`].
#[derive(Debug, Clone, PartialEq)]
pub struct BindingObject {
    pub resource: BindingResource,
    /// Range of the pool this object was drawn from.
    pub pool: Range,
    pub state: LeaseState,
    pub start_time: DateTime<Utc>,
    pub preferred_end_time: DateTime<Utc>,
    pub valid_end_time: DateTime<Utc>,
    pub options: Vec<RawOption>,
}

impl BindingObject {
    pub fn new(
        resource: BindingResource,
        pool: Range,
        state: LeaseState,
        lifetimes: Lifetimes,
    ) -> Self {
        let mut object = Self {
            resource,
            pool,
            state,
            start_time: Utc::now(),
            preferred_end_time: Utc::now(),
            valid_end_time: Utc::now(),
            options: Vec::new(),
        };
        object.refresh(state, lifetimes);
        object
    }

    /// Restarts the lifetimes from now and moves to `state`.
    pub fn refresh(&mut self, state: LeaseState, lifetimes: Lifetimes) {
        let now = Utc::now();
        self.state = state;
        self.start_time = now;
        self.preferred_end_time = end_time(now, lifetimes.preferred);
        self.valid_end_time = end_time(now, lifetimes.valid);
    }

    /// Lifetimes as granted at the last refresh.
    pub fn lifetimes(&self) -> Lifetimes {
        Lifetimes {
            preferred: span_seconds(self.start_time, self.preferred_end_time),
            valid: span_seconds(self.start_time, self.valid_end_time),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.valid_end_time
    }

    pub fn ip(&self) -> IpAddr {
        self.resource.ip()
    }
}

/// The server's record of one IA for one client on one link.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub client_id: Vec<u8>,
    pub ia_type: IaType,
    /// Client-chosen correlator; always zero for v4.
    pub iaid: u32,
    pub state: LeaseState,
    /// Name of the link the binding was made on.
    pub link: String,
    pub objects: Vec<BindingObject>,
}

impl Binding {
    pub fn key(&self) -> IaKey {
        IaKey::new(&self.client_id, self.ia_type, self.iaid)
    }

    pub fn find_object(&self, ip: IpAddr) -> Option<&BindingObject> {
        self.objects.iter().find(|object| object.ip() == ip)
    }

    /// Shortest preferred lifetime among the objects, or infinity when the
    /// binding is empty.
    pub fn min_preferred_lifetime(&self) -> u32 {
        self.objects
            .iter()
            .map(|object| object.lifetimes().preferred)
            .min()
            .unwrap_or(INFINITE_LIFETIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::AddressRange;

    fn pool() -> Range {
        Range::Address("2001:db8::10-2001:db8::20".parse::<AddressRange>().unwrap())
    }

    #[test]
    fn test_lifetimes_survive_refresh() {
        let object = BindingObject::new(
            BindingResource::Address("2001:db8::10".parse().unwrap()),
            pool(),
            LeaseState::Offered,
            Lifetimes::new(1800, 3600),
        );
        assert_eq!(object.lifetimes(), Lifetimes::new(1800, 3600));
        assert!(!object.is_expired());
    }

    #[test]
    fn test_infinite_lifetime() {
        let object = BindingObject::new(
            BindingResource::Address("2001:db8::10".parse().unwrap()),
            pool(),
            LeaseState::Leased,
            Lifetimes::new(INFINITE_LIFETIME, INFINITE_LIFETIME),
        );
        assert_eq!(object.lifetimes().preferred, INFINITE_LIFETIME);
        assert_eq!(object.valid_end_time, never());
    }

    #[test]
    fn test_min_preferred_lifetime() {
        let mut binding = Binding {
            client_id: vec![0, 1, 2],
            ia_type: IaType::Na,
            iaid: 1,
            state: LeaseState::Leased,
            link: "lan".to_string(),
            objects: vec![],
        };
        assert_eq!(binding.min_preferred_lifetime(), INFINITE_LIFETIME);

        for (ip, preferred) in [("2001:db8::10", 900), ("2001:db8::11", 300)] {
            binding.objects.push(BindingObject::new(
                BindingResource::Address(ip.parse().unwrap()),
                pool(),
                LeaseState::Leased,
                Lifetimes::new(preferred, 3600),
            ));
        }
        assert_eq!(binding.min_preferred_lifetime(), 300);
    }

    #[test]
    fn test_held_states() {
        assert!(LeaseState::Offered.is_held());
        assert!(LeaseState::Leased.is_held());
        assert!(LeaseState::Reserved.is_held());
        assert!(!LeaseState::Released.is_held());
        assert!(!LeaseState::Declined.is_held());
        assert!(!LeaseState::Available.is_held());
    }
}
