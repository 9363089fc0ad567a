//! DHCPv6 message parsing and encoding (RFC 3315 §6, §7).
//!
//! Client/server messages are a message type, a 24-bit transaction ID and
//! options. Relay messages carry a hop count and two addresses instead of
//! the transaction ID; they are decoded so the server can recognise and
//! drop them.

use std::fmt;
use std::net::Ipv6Addr;

use super::options::{self, Dhcp6Option, Ia, code, decode_domain_name};
use crate::binding::IaType;
use crate::error::{Error, Result};
use crate::policy::ClientMessage;

/// Client/server header: type + transaction ID.
const HEADER_SIZE: usize = 4;

/// Relay header: type, hop count, link and peer addresses.
const RELAY_HEADER_SIZE: usize = 34;

/// DHCPv6 message types (RFC 3315 §5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForw = 12,
    RelayRepl = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        let message_type = match value {
            1 => Self::Solicit,
            2 => Self::Advertise,
            3 => Self::Request,
            4 => Self::Confirm,
            5 => Self::Renew,
            6 => Self::Rebind,
            7 => Self::Reply,
            8 => Self::Release,
            9 => Self::Decline,
            10 => Self::Reconfigure,
            11 => Self::InformationRequest,
            12 => Self::RelayForw,
            13 => Self::RelayRepl,
            other => return Err(other),
        };
        Ok(message_type)
    }
}

impl MessageType {
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::RelayForw | Self::RelayRepl)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Solicit => "SOLICIT",
            Self::Advertise => "ADVERTISE",
            Self::Request => "REQUEST",
            Self::Confirm => "CONFIRM",
            Self::Renew => "RENEW",
            Self::Rebind => "REBIND",
            Self::Reply => "REPLY",
            Self::Release => "RELEASE",
            Self::Decline => "DECLINE",
            Self::Reconfigure => "RECONFIGURE",
            Self::InformationRequest => "INFORMATION-REQUEST",
            Self::RelayForw => "RELAY-FORW",
            Self::RelayRepl => "RELAY-REPL",
        };
        f.write_str(name)
    }
}

/// Relay agent header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub hop_count: u8,
    pub link_address: Ipv6Addr,
    pub peer_address: Ipv6Addr,
}

/// A parsed DHCPv6 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcp6Message {
    pub message_type: MessageType,
    /// 24-bit transaction ID; zero for relay messages.
    pub transaction_id: u32,
    /// Present only for RELAY-FORW / RELAY-REPL.
    pub relay: Option<RelayHeader>,
    pub options: Vec<Dhcp6Option>,
}

impl Dhcp6Message {
    pub fn new(message_type: MessageType, transaction_id: u32) -> Self {
        Self {
            message_type,
            transaction_id: transaction_id & 0x00ff_ffff,
            relay: None,
            options: Vec::new(),
        }
    }

    /// Parses a message received from the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] for empty or truncated messages,
    /// unknown message types, or malformed options.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&type_byte) = data.first() else {
            return Err(Error::InvalidPacket("Empty DHCPv6 message".to_string()));
        };
        let message_type = MessageType::try_from(type_byte).map_err(|value| {
            Error::InvalidPacket(format!("Unknown DHCPv6 message type: {}", value))
        })?;

        if message_type.is_relay() {
            if data.len() < RELAY_HEADER_SIZE {
                return Err(Error::InvalidPacket(format!(
                    "Relay message too short: {} bytes",
                    data.len()
                )));
            }
            let address = |at: usize| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[at..at + 16]);
                Ipv6Addr::from(octets)
            };
            return Ok(Self {
                message_type,
                transaction_id: 0,
                relay: Some(RelayHeader {
                    hop_count: data[1],
                    link_address: address(2),
                    peer_address: address(18),
                }),
                options: options::parse_options(&data[RELAY_HEADER_SIZE..])?,
            });
        }

        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Message too short: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            message_type,
            transaction_id: u32::from_be_bytes([0, data[1], data[2], data[3]]),
            relay: None,
            options: options::parse_options(&data[HEADER_SIZE..])?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.push(self.message_type as u8);
        match &self.relay {
            Some(relay) => {
                out.push(relay.hop_count);
                out.extend_from_slice(&relay.link_address.octets());
                out.extend_from_slice(&relay.peer_address.octets());
            }
            None => out.extend_from_slice(&self.transaction_id.to_be_bytes()[1..]),
        }
        options::encode_options(&self.options, &mut out);
        out
    }

    /// Starts a reply: same transaction ID, our Server Identifier, and the
    /// client's Client Identifier copied back.
    pub fn reply_to(request: &Dhcp6Message, message_type: MessageType, server_duid: &[u8]) -> Self {
        let mut reply = Self::new(message_type, request.transaction_id);
        reply.options.push(Dhcp6Option::ServerId(server_duid.to_vec()));
        if let Some(client_id) = request.client_id() {
            reply.options.push(Dhcp6Option::ClientId(client_id.to_vec()));
        }
        reply
    }

    pub fn client_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::ClientId(duid) => Some(duid.as_slice()),
            _ => None,
        })
    }

    pub fn server_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::ServerId(duid) => Some(duid.as_slice()),
            _ => None,
        })
    }

    /// IA options of every kind, in the order the client sent them.
    pub fn ias(&self) -> impl Iterator<Item = &Ia> {
        self.options.iter().filter_map(|option| match option {
            Dhcp6Option::Ia(ia) => Some(ia),
            _ => None,
        })
    }

    pub fn ias_of(&self, ia_type: IaType) -> impl Iterator<Item = &Ia> {
        self.ias().filter(move |ia| ia.ia_type == ia_type)
    }

    pub fn has_ias(&self) -> bool {
        self.ias().next().is_some()
    }

    pub fn has_rapid_commit(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, Dhcp6Option::RapidCommit))
    }

    /// Codes from the Option Request Option, empty when absent.
    pub fn requested_options(&self) -> &[u16] {
        self.options
            .iter()
            .find_map(|option| match option {
                Dhcp6Option::Oro(codes) => Some(codes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Client FQDN flags and decoded name.
    pub fn client_fqdn(&self) -> Option<(u8, String)> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::ClientFqdn { flags, name } => decode_domain_name(name)
                .ok()
                .map(|(name, _)| (*flags, name)),
            _ => None,
        })
    }

    /// Status code at message level, if any.
    pub fn status(&self) -> Option<options::StatusCode> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::StatusCode { status, .. } => Some(*status),
            _ => None,
        })
    }
}

impl ClientMessage for Dhcp6Message {
    fn option_data(&self, option_code: u16) -> Option<Vec<u8>> {
        self.options
            .iter()
            .find(|option| option.code() == option_code)
            .map(Dhcp6Option::payload)
    }

    fn client_classes(&self) -> Vec<Vec<u8>> {
        let mut classes = Vec::new();
        for option in &self.options {
            match option {
                Dhcp6Option::UserClass(items) => classes.extend(items.iter().cloned()),
                Dhcp6Option::VendorClass { data, .. } => classes.extend(data.iter().cloned()),
                _ => {}
            }
        }
        classes
    }
}

/// Options kept in a reply even when the client's ORO does not list them.
pub fn is_always_sent(option_code: u16) -> bool {
    matches!(
        option_code,
        code::CLIENT_ID
            | code::SERVER_ID
            | code::IA_NA
            | code::IA_TA
            | code::IA_PD
            | code::STATUS_CODE
            | code::RAPID_COMMIT
            | code::PREFERENCE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v6::options::{IaAddress, StatusCode};

    fn solicit_bytes() -> Vec<u8> {
        let mut message = Dhcp6Message::new(MessageType::Solicit, 0xabcdef);
        message.options.push(Dhcp6Option::ClientId(vec![0, 1, 0xaa]));
        message.options.push(Dhcp6Option::ElapsedTime(0));
        message.options.push(Dhcp6Option::Ia(Ia::empty(IaType::Na, 1)));
        message.options.push(Dhcp6Option::Oro(vec![23, 24]));
        message.encode()
    }

    #[test]
    fn test_parse_solicit() {
        let message = Dhcp6Message::parse(&solicit_bytes()).unwrap();
        assert_eq!(message.message_type, MessageType::Solicit);
        assert_eq!(message.transaction_id, 0xabcdef);
        assert_eq!(message.client_id(), Some(&[0, 1, 0xaa][..]));
        assert!(message.server_id().is_none());
        assert_eq!(message.ias_of(IaType::Na).count(), 1);
        assert_eq!(message.requested_options(), &[23, 24]);
        assert!(!message.has_rapid_commit());
    }

    #[test]
    fn test_header_encoding() {
        let bytes = solicit_bytes();
        assert_eq!(&bytes[..4], &[1, 0xab, 0xcd, 0xef]);
        assert_eq!(Dhcp6Message::new(MessageType::Reply, 0xff12_3456).transaction_id, 0x123456);
    }

    #[test]
    fn test_reply_to_copies_identity() {
        let request = Dhcp6Message::parse(&solicit_bytes()).unwrap();
        let reply = Dhcp6Message::reply_to(&request, MessageType::Advertise, &[0, 3, 0, 1]);
        assert_eq!(reply.transaction_id, request.transaction_id);
        assert_eq!(reply.server_id(), Some(&[0, 3, 0, 1][..]));
        assert_eq!(reply.client_id(), request.client_id());
    }

    #[test]
    fn test_relay_message_header() {
        let mut bytes = vec![12, 1];
        bytes.extend_from_slice(&"2001:db8:1::1".parse::<Ipv6Addr>().unwrap().octets());
        bytes.extend_from_slice(&"fe80::1".parse::<Ipv6Addr>().unwrap().octets());
        let message = Dhcp6Message::parse(&bytes).unwrap();
        assert!(message.message_type.is_relay());
        let relay = message.relay.unwrap();
        assert_eq!(relay.hop_count, 1);
        assert_eq!(relay.peer_address, "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(message.encode(), bytes);
    }

    #[test]
    fn test_invalid_messages() {
        assert!(Dhcp6Message::parse(&[]).is_err());
        assert!(Dhcp6Message::parse(&[1, 0]).is_err());
        assert!(Dhcp6Message::parse(&[99, 0, 0, 0]).is_err());
        assert!(Dhcp6Message::parse(&[12, 0, 0]).is_err());
        assert!(Dhcp6Message::parse(&[1, 0, 0, 0, 0, 1, 0, 9]).is_err());
    }

    #[test]
    fn test_client_classes_and_option_data() {
        let mut message = Dhcp6Message::new(MessageType::Solicit, 1);
        message.options.push(Dhcp6Option::UserClass(vec![b"lab".to_vec()]));
        message.options.push(Dhcp6Option::VendorClass {
            enterprise: 9,
            data: vec![b"router".to_vec()],
        });
        assert_eq!(message.client_classes(), vec![b"lab".to_vec(), b"router".to_vec()]);
        assert_eq!(message.option_data(code::USER_CLASS), Some(vec![0, 3, b'l', b'a', b'b']));
        assert_eq!(message.option_data(code::CLIENT_ID), None);
    }

    #[test]
    fn test_status_and_addresses_survive_roundtrip() {
        let mut ia = Ia::empty(IaType::Na, 5);
        ia.options.push(Dhcp6Option::IaAddr(IaAddress {
            address: "2001:db8::10".parse().unwrap(),
            preferred_lifetime: 0,
            valid_lifetime: 0,
            options: vec![],
        }));
        let mut reply = Dhcp6Message::new(MessageType::Reply, 7);
        reply.options.push(Dhcp6Option::Ia(ia));
        reply.options.push(Dhcp6Option::StatusCode {
            status: StatusCode::NotOnLink,
            message: "off link".to_string(),
        });

        let parsed = Dhcp6Message::parse(&reply.encode()).unwrap();
        assert_eq!(parsed, reply);
        assert_eq!(parsed.status(), Some(StatusCode::NotOnLink));
        assert!(parsed.ias().all(Ia::has_resources));
    }
}
