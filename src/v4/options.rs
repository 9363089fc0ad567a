//! DHCPv4 options (RFC 2132).
//!
//! Each option is a code byte, a length byte and the payload. Options this
//! server reads or writes are decoded into [`Dhcp4Option`] variants;
//! anything else is kept as [`Dhcp4Option::Unknown`] so it can be matched by
//! filters and echoed back.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3046: DHCP Relay Agent Information Option (Option 82)
//! - RFC 4702: Client FQDN Option (Option 81)

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Routers (3) and DNS servers (6) are limited by the one-byte length field.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// DHCPv4 option codes understood by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DnsServer = 6,
    Hostname = 12,
    DomainName = 15,
    InterfaceMtu = 26,
    BroadcastAddress = 28,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    /// Indicates `sname`/`file` carry options (RFC 2132 §9.3).
    OptionOverload = 52,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    RenewalTime = 58,
    RebindingTime = 59,
    /// Vendor class identifier, used by client-class filters.
    VendorClass = 60,
    ClientIdentifier = 61,
    ClientFqdn = 81,
    RelayAgentInfo = 82,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Pad,
            1 => Self::SubnetMask,
            3 => Self::Router,
            6 => Self::DnsServer,
            12 => Self::Hostname,
            15 => Self::DomainName,
            26 => Self::InterfaceMtu,
            28 => Self::BroadcastAddress,
            50 => Self::RequestedIpAddress,
            51 => Self::LeaseTime,
            52 => Self::OptionOverload,
            53 => Self::MessageType,
            54 => Self::ServerIdentifier,
            55 => Self::ParameterRequestList,
            58 => Self::RenewalTime,
            59 => Self::RebindingTime,
            60 => Self::VendorClass,
            61 => Self::ClientIdentifier,
            81 => Self::ClientFqdn,
            82 => Self::RelayAgentInfo,
            255 => Self::End,
            other => return Err(other),
        };
        Ok(code)
    }
}

/// DHCPv4 message types (Option 53).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// Option overload flags (Option 52).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    File = 1,
    Sname = 2,
    Both = 3,
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

/// A decoded DHCPv4 option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp4Option {
    SubnetMask(Ipv4Addr),
    /// First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    DnsServer(Vec<Ipv4Addr>),
    Hostname(String),
    DomainName(String),
    InterfaceMtu(u16),
    BroadcastAddress(Ipv4Addr),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    OptionOverload(OverloadFlag),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    RenewalTime(u32),
    RebindingTime(u32),
    VendorClass(Vec<u8>),
    ClientIdentifier(Vec<u8>),
    /// Flags, the two deprecated RCODE bytes, and the domain name as sent.
    ClientFqdn { flags: u8, name: Vec<u8> },
    /// Echoed unchanged in replies (RFC 3046 §2.2).
    RelayAgentInfo(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

fn ipv4(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("Invalid {} length", what)))?;
    Ok(Ipv4Addr::from(octets))
}

fn ipv4_list(data: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if data.is_empty() || !data.len().is_multiple_of(4) {
        return Err(Error::InvalidPacket(format!("Invalid {} option length", what)));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

fn seconds(data: &[u8], what: &str) -> Result<u32> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("Invalid {} length", what)))?;
    Ok(u32::from_be_bytes(bytes))
}

fn single_byte(data: &[u8], what: &str) -> Result<u8> {
    match data {
        [value] => Ok(*value),
        _ => Err(Error::InvalidPacket(format!("Invalid {} length", what))),
    }
}

impl Dhcp4Option {
    pub fn code(&self) -> u8 {
        let code = match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask,
            Self::Router(_) => OptionCode::Router,
            Self::DnsServer(_) => OptionCode::DnsServer,
            Self::Hostname(_) => OptionCode::Hostname,
            Self::DomainName(_) => OptionCode::DomainName,
            Self::InterfaceMtu(_) => OptionCode::InterfaceMtu,
            Self::BroadcastAddress(_) => OptionCode::BroadcastAddress,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress,
            Self::LeaseTime(_) => OptionCode::LeaseTime,
            Self::OptionOverload(_) => OptionCode::OptionOverload,
            Self::MessageType(_) => OptionCode::MessageType,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList,
            Self::RenewalTime(_) => OptionCode::RenewalTime,
            Self::RebindingTime(_) => OptionCode::RebindingTime,
            Self::VendorClass(_) => OptionCode::VendorClass,
            Self::ClientIdentifier(_) => OptionCode::ClientIdentifier,
            Self::ClientFqdn { .. } => OptionCode::ClientFqdn,
            Self::RelayAgentInfo(_) => OptionCode::RelayAgentInfo,
            Self::Unknown(code, _) => return *code,
        };
        code as u8
    }

    /// Decodes one option payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the payload length is wrong for
    /// the option, or for Pad/End which carry no payload.
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        let option = match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Self::SubnetMask(ipv4(data, "subnet mask")?),
            Ok(OptionCode::Router) => Self::Router(ipv4_list(data, "router")?),
            Ok(OptionCode::DnsServer) => Self::DnsServer(ipv4_list(data, "DNS server")?),
            Ok(OptionCode::Hostname) => Self::Hostname(String::from_utf8_lossy(data).to_string()),
            Ok(OptionCode::DomainName) => {
                Self::DomainName(String::from_utf8_lossy(data).to_string())
            }
            Ok(OptionCode::InterfaceMtu) => {
                let bytes: [u8; 2] = data
                    .try_into()
                    .map_err(|_| Error::InvalidPacket("Invalid MTU length".to_string()))?;
                Self::InterfaceMtu(u16::from_be_bytes(bytes))
            }
            Ok(OptionCode::BroadcastAddress) => {
                Self::BroadcastAddress(ipv4(data, "broadcast address")?)
            }
            Ok(OptionCode::RequestedIpAddress) => {
                Self::RequestedIpAddress(ipv4(data, "requested IP address")?)
            }
            Ok(OptionCode::LeaseTime) => Self::LeaseTime(seconds(data, "lease time")?),
            Ok(OptionCode::OptionOverload) => {
                let value = single_byte(data, "option overload")?;
                let flag = OverloadFlag::try_from(value).map_err(|value| {
                    Error::InvalidPacket(format!("Invalid option overload value: {}", value))
                })?;
                Self::OptionOverload(flag)
            }
            Ok(OptionCode::MessageType) => {
                let value = single_byte(data, "message type")?;
                let message_type = MessageType::try_from(value).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Self::MessageType(message_type)
            }
            Ok(OptionCode::ServerIdentifier) => {
                Self::ServerIdentifier(ipv4(data, "server identifier")?)
            }
            Ok(OptionCode::ParameterRequestList) => Self::ParameterRequestList(data.to_vec()),
            Ok(OptionCode::RenewalTime) => Self::RenewalTime(seconds(data, "renewal time")?),
            Ok(OptionCode::RebindingTime) => Self::RebindingTime(seconds(data, "rebinding time")?),
            Ok(OptionCode::VendorClass) => Self::VendorClass(data.to_vec()),
            Ok(OptionCode::ClientIdentifier) => Self::ClientIdentifier(data.to_vec()),
            Ok(OptionCode::ClientFqdn) => {
                if data.len() < 3 {
                    return Err(Error::InvalidPacket("Invalid client FQDN length".to_string()));
                }
                Self::ClientFqdn {
                    flags: data[0],
                    name: data[3..].to_vec(),
                }
            }
            Ok(OptionCode::RelayAgentInfo) => Self::RelayAgentInfo(data.to_vec()),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => {
                return Err(Error::InvalidPacket(
                    "Pad/End should not be parsed as options".to_string(),
                ));
            }
            Err(unknown_code) => Self::Unknown(unknown_code, data.to_vec()),
        };
        Ok(option)
    }

    /// The option payload, without code and length.
    pub fn payload(&self) -> Vec<u8> {
        fn addresses(addrs: &[Ipv4Addr]) -> Vec<u8> {
            addrs
                .iter()
                .take(MAX_ADDRESSES_PER_OPTION)
                .flat_map(|addr| addr.octets())
                .collect()
        }

        match self {
            Self::SubnetMask(addr)
            | Self::BroadcastAddress(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => addr.octets().to_vec(),
            Self::Router(addrs) | Self::DnsServer(addrs) => addresses(addrs),
            Self::Hostname(name) | Self::DomainName(name) => name.as_bytes().to_vec(),
            Self::InterfaceMtu(mtu) => mtu.to_be_bytes().to_vec(),
            Self::LeaseTime(time) | Self::RenewalTime(time) | Self::RebindingTime(time) => {
                time.to_be_bytes().to_vec()
            }
            Self::OptionOverload(flag) => vec![*flag as u8],
            Self::MessageType(message_type) => vec![*message_type as u8],
            Self::ParameterRequestList(data)
            | Self::VendorClass(data)
            | Self::ClientIdentifier(data)
            | Self::RelayAgentInfo(data)
            | Self::Unknown(_, data) => data.clone(),
            Self::ClientFqdn { flags, name } => {
                let mut data = vec![*flags, 0, 0];
                data.extend_from_slice(name);
                data
            }
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    ///
    /// Payloads longer than 255 bytes are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let len = payload.len().min(255);
        let mut result = Vec::with_capacity(len + 2);
        result.push(self.code());
        result.push(len as u8);
        result.extend_from_slice(&payload[..len]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversions() {
        for value in 1..=8u8 {
            let msg_type = MessageType::try_from(value).unwrap();
            assert_eq!(msg_type as u8, value);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(9).is_err());
    }

    #[test]
    fn test_option_encode_decode_roundtrip() {
        let options = vec![
            Dhcp4Option::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)),
            Dhcp4Option::Router(vec![Ipv4Addr::new(192, 168, 1, 1)]),
            Dhcp4Option::DnsServer(vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]),
            Dhcp4Option::Hostname("test-host".to_string()),
            Dhcp4Option::LeaseTime(86400),
            Dhcp4Option::MessageType(MessageType::Discover),
            Dhcp4Option::InterfaceMtu(1500),
            Dhcp4Option::VendorClass(b"MSFT 5.0".to_vec()),
            Dhcp4Option::ClientFqdn {
                flags: 0x01,
                name: b"host.example.com".to_vec(),
            },
        ];

        for original in options {
            let encoded = original.encode();
            assert_eq!(encoded[1] as usize, encoded.len() - 2);
            let decoded = Dhcp4Option::parse(encoded[0], &encoded[2..]).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_option_invalid_lengths() {
        assert!(Dhcp4Option::parse(1, &[255, 255, 255]).is_err());
        assert!(Dhcp4Option::parse(3, &[]).is_err());
        assert!(Dhcp4Option::parse(6, &[8, 8, 8]).is_err());
        assert!(Dhcp4Option::parse(51, &[0, 0, 0]).is_err());
        assert!(Dhcp4Option::parse(53, &[1, 1]).is_err());
        assert!(Dhcp4Option::parse(81, &[0, 0]).is_err());
    }

    #[test]
    fn test_unknown_option() {
        let decoded = Dhcp4Option::parse(100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(decoded, Dhcp4Option::Unknown(100, vec![1, 2, 3, 4]));
        assert_eq!(decoded.code(), 100);
        assert_eq!(decoded.payload(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_long_payload_truncated() {
        let option = Dhcp4Option::Hostname("a".repeat(300));
        let encoded = option.encode();
        assert_eq!(encoded[1], 255);
        assert_eq!(encoded.len(), 257);
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::Discover.to_string(), "DISCOVER");
        assert_eq!(MessageType::Nak.to_string(), "NAK");
        assert_eq!(MessageType::Inform.to_string(), "INFORM");
    }
}
