//! Immutable address and prefix ranges.
//!
//! Ranges are totally ordered (family, then start, then end) so pools can be
//! kept in sorted maps and located by the address they contain. Every range
//! also exposes an index space: member `0` is the first address (or delegated
//! prefix) and `size() - 1` the last, which is what the binding managers use
//! to track occupancy.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::Ipv6Net;

use crate::error::{Error, Result};

/// Maps an address onto a single integer line, keeping v4 and v6 apart by
/// family (v4 addresses occupy the low 32 bits).
pub fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_ip(value: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

/// An inclusive range of addresses of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressRange {
    start: IpAddr,
    end: IpAddr,
}

impl AddressRange {
    /// Creates a range, rejecting mixed families and `start > end`.
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err(Error::InvalidConfig(format!(
                "range {}-{} mixes address families",
                start, end
            )));
        }
        if ip_to_u128(start) > ip_to_u128(end) {
            return Err(Error::InvalidConfig(format!(
                "range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn is_ipv4(&self) -> bool {
        self.start.is_ipv4()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        ip.is_ipv4() == self.is_ipv4()
            && ip_to_u128(ip) >= ip_to_u128(self.start)
            && ip_to_u128(ip) <= ip_to_u128(self.end)
    }

    /// Number of addresses, saturating for the full v6 space.
    pub fn size(&self) -> u128 {
        (ip_to_u128(self.end) - ip_to_u128(self.start)).saturating_add(1)
    }

    pub fn nth(&self, index: u128) -> Option<IpAddr> {
        if index >= self.size() {
            return None;
        }
        Some(u128_to_ip(ip_to_u128(self.start) + index, self.is_ipv4()))
    }

    pub fn index_of(&self, ip: IpAddr) -> Option<u128> {
        self.contains(ip)
            .then(|| ip_to_u128(ip) - ip_to_u128(self.start))
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.is_ipv4() == other.is_ipv4()
            && ip_to_u128(self.start) <= ip_to_u128(other.end)
            && ip_to_u128(other.start) <= ip_to_u128(self.end)
    }
}

impl FromStr for AddressRange {
    type Err = Error;

    /// Parses `"start-end"`, or a single address as a one-member range.
    fn from_str(value: &str) -> Result<Self> {
        let parse = |text: &str| {
            text.trim().parse::<IpAddr>().map_err(|error| {
                Error::InvalidConfig(format!("invalid address '{}': {}", text.trim(), error))
            })
        };
        match value.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => {
                let ip = parse(value)?;
                Self::new(ip, ip)
            }
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A v6 prefix carved into delegated prefixes of a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixRange {
    prefix: Ipv6Net,
    delegated_length: u8,
}

impl PrefixRange {
    pub fn new(prefix: Ipv6Net, delegated_length: u8) -> Result<Self> {
        if delegated_length < prefix.prefix_len() || delegated_length > 128 {
            return Err(Error::InvalidConfig(format!(
                "delegated length /{} invalid for prefix {}",
                delegated_length, prefix
            )));
        }
        Ok(Self {
            prefix: prefix.trunc(),
            delegated_length,
        })
    }

    pub fn prefix(&self) -> Ipv6Net {
        self.prefix
    }

    pub fn delegated_length(&self) -> u8 {
        self.delegated_length
    }

    fn step_bits(&self) -> u32 {
        128 - self.delegated_length as u32
    }

    pub fn size(&self) -> u128 {
        let bits = (self.delegated_length - self.prefix.prefix_len()) as u32;
        if bits >= 128 {
            u128::MAX
        } else {
            1u128 << bits
        }
    }

    pub fn nth(&self, index: u128) -> Option<Ipv6Addr> {
        if index >= self.size() {
            return None;
        }
        let offset = index.checked_shl(self.step_bits()).unwrap_or(0);
        Some(Ipv6Addr::from(u128::from(self.prefix.network()) + offset))
    }

    /// Index of a delegated prefix; `None` when the address is outside the
    /// range or not aligned on a delegated boundary.
    pub fn index_of(&self, prefix: Ipv6Addr) -> Option<u128> {
        if !self.prefix.contains(&prefix) {
            return None;
        }
        let offset = u128::from(prefix) - u128::from(self.prefix.network());
        let step = self.step_bits();
        if step < 128 && offset & ((1u128 << step) - 1) != 0 {
            return None;
        }
        Some(offset.checked_shr(step).unwrap_or(0))
    }

    pub fn contains(&self, prefix: Ipv6Addr) -> bool {
        self.prefix.contains(&prefix)
    }

    pub fn overlaps(&self, other: &PrefixRange) -> bool {
        self.prefix.contains(&other.prefix.network()) || other.prefix.contains(&self.prefix.network())
    }
}

impl fmt::Display for PrefixRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->/{}", self.prefix, self.delegated_length)
    }
}

/// The range owned by a pool: either individual addresses or delegated
/// prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Range {
    Address(AddressRange),
    Prefix(PrefixRange),
}

impl Range {
    /// First address covered by the range, used as the sort key.
    pub fn first(&self) -> IpAddr {
        match self {
            Self::Address(range) => range.start(),
            Self::Prefix(range) => IpAddr::V6(range.prefix().network()),
        }
    }

    /// Last address covered by the range.
    pub fn last(&self) -> IpAddr {
        match self {
            Self::Address(range) => range.end(),
            Self::Prefix(range) => IpAddr::V6(range.prefix().broadcast()),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Self::Address(range), ip) => range.contains(ip),
            (Self::Prefix(range), IpAddr::V6(v6)) => range.contains(v6),
            (Self::Prefix(_), IpAddr::V4(_)) => false,
        }
    }

    pub fn size(&self) -> u128 {
        match self {
            Self::Address(range) => range.size(),
            Self::Prefix(range) => range.size(),
        }
    }

    pub fn member(&self, index: u128) -> Option<IpAddr> {
        match self {
            Self::Address(range) => range.nth(index),
            Self::Prefix(range) => range.nth(index).map(IpAddr::V6),
        }
    }

    pub fn index_of(&self, ip: IpAddr) -> Option<u128> {
        match (self, ip) {
            (Self::Address(range), ip) => range.index_of(ip),
            (Self::Prefix(range), IpAddr::V6(v6)) => range.index_of(v6),
            (Self::Prefix(_), IpAddr::V4(_)) => None,
        }
    }

    /// Prefix length of each member: 32/128 for addresses, the delegated
    /// length for prefixes.
    pub fn member_length(&self) -> u8 {
        match self {
            Self::Address(range) if range.is_ipv4() => 32,
            Self::Address(_) => 128,
            Self::Prefix(range) => range.delegated_length(),
        }
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        match (self, other) {
            (Self::Address(a), Self::Address(b)) => a.overlaps(b),
            (Self::Prefix(a), Self::Prefix(b)) => a.overlaps(b),
            _ => false,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(range) => range.fmt(f),
            Self::Prefix(range) => range.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v6(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_address_range() {
        let range: AddressRange = "2001:db8::10-2001:db8::1f".parse().unwrap();
        assert_eq!(range.size(), 16);
        assert!(range.contains(v6("2001:db8::15")));
        assert!(!range.contains(v6("2001:db8::20")));
        assert!(!range.contains("10.0.0.1".parse().unwrap()));
        assert_eq!(range.nth(0), Some(v6("2001:db8::10")));
        assert_eq!(range.nth(16), None);
        assert_eq!(range.index_of(v6("2001:db8::1f")), Some(15));
    }

    #[test]
    fn test_single_address_range() {
        let range: AddressRange = "192.168.1.10".parse().unwrap();
        assert_eq!(range.size(), 1);
        assert_eq!(range.start(), range.end());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!("192.168.1.20-192.168.1.10".parse::<AddressRange>().is_err());
        assert!("192.168.1.1-2001:db8::1".parse::<AddressRange>().is_err());
        assert!("not-an-address".parse::<AddressRange>().is_err());
    }

    #[test]
    fn test_ranges_order_by_start() {
        let low: AddressRange = "10.0.0.1-10.0.0.5".parse().unwrap();
        let high: AddressRange = "10.0.0.6-10.0.0.9".parse().unwrap();
        assert!(Range::Address(low) < Range::Address(high));
        assert!(!low.overlaps(&high));
        let wide: AddressRange = "10.0.0.4-10.0.0.7".parse().unwrap();
        assert!(low.overlaps(&wide) && high.overlaps(&wide));
    }

    #[test]
    fn test_prefix_range_members() {
        let range = PrefixRange::new("2001:db8:100::/48".parse().unwrap(), 56).unwrap();
        assert_eq!(range.size(), 256);
        assert_eq!(range.nth(0), Some("2001:db8:100::".parse().unwrap()));
        assert_eq!(range.nth(1), Some("2001:db8:100:100::".parse().unwrap()));
        assert_eq!(range.index_of("2001:db8:100:100::".parse().unwrap()), Some(1));
        assert_eq!(range.index_of("2001:db8:100:101::".parse().unwrap()), None);
        assert!(PrefixRange::new("2001:db8::/48".parse().unwrap(), 40).is_err());
    }

    #[test]
    fn test_range_member_length() {
        let v4: AddressRange = "10.0.0.1-10.0.0.2".parse().unwrap();
        assert_eq!(Range::Address(v4).member_length(), 32);
        let pd = PrefixRange::new("2001:db8::/48".parse().unwrap(), 64).unwrap();
        assert_eq!(Range::Prefix(pd).member_length(), 64);
    }
}
