//! DHCPv4 packet parsing and encoding (RFC 2131).
//!
//! The fixed BOOTP header is 236 bytes: op, htype, hlen, hops, xid,
//! secs, flags, the four address fields, then chaddr, sname and file.
//! The magic cookie follows, then the options area. When option 52 is
//! present, sname and file carry further options.

use std::net::Ipv4Addr;

use super::options::{Dhcp4Option, MessageType, OptionCode, OverloadFlag};
use crate::error::{Error, Result};
use crate::policy::ClientMessage;

/// Identifies DHCP packets (vs BOOTP).
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const CHADDR_OFFSET: usize = 28;
const SNAME_OFFSET: usize = CHADDR_OFFSET + 16;
const FILE_OFFSET: usize = SNAME_OFFSET + 64;
const COOKIE_OFFSET: usize = FILE_OFFSET + 128;

/// Fixed header plus magic cookie.
const HEADER_SIZE: usize = COOKIE_OFFSET + MAGIC_COOKIE.len();

/// Replies are padded to the BOOTP minimum (RFC 2131 §2).
const MIN_PACKET_SIZE: usize = 300;

/// Relay loop protection (RFC 2131 §4.1).
const MAX_HOPS: u8 = 16;

/// Broadcast bit of the `flags` field.
pub const BROADCAST_FLAG: u16 = 0x8000;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

/// A parsed DHCPv4 packet, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcp4Packet {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID chosen by the client, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    /// Client address, set in RENEWING/REBINDING.
    pub ciaddr: Ipv4Addr,
    /// Address being assigned to the client.
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    /// Relay agent address; zero when the client is on a local link.
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<Dhcp4Option>,
}

fn read_ipv4(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

fn parse_options(data: &[u8]) -> Result<Vec<Dhcp4Option>> {
    let mut options = Vec::new();
    let mut index = 0;

    while index < data.len() {
        let code = data[index];
        if code == OptionCode::Pad as u8 {
            index += 1;
            continue;
        }
        if code == OptionCode::End as u8 {
            break;
        }

        let Some(&length) = data.get(index + 1) else {
            return Err(Error::InvalidPacket("Option length missing".to_string()));
        };
        let start = index + 2;
        let end = start + length as usize;
        if end > data.len() {
            return Err(Error::InvalidPacket("Option data truncated".to_string()));
        }
        options.push(Dhcp4Option::parse(code, &data[start..end])?);
        index = end;
    }

    Ok(options)
}

impl Dhcp4Packet {
    /// Parses a packet received from the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the packet is shorter than the
    /// fixed header, the magic cookie is wrong, the hop count exceeds 16,
    /// an Ethernet `hlen` is not 6, or any option is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                HEADER_SIZE
            )));
        }
        if data[COOKIE_OFFSET..HEADER_SIZE] != MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let (op, htype, hlen, hops) = (data[0], data[1], data[2], data[3]);
        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "Hop count {} exceeds maximum {}",
                hops, MAX_HOPS
            )));
        }
        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} for Ethernet (expected {})",
                hlen, HLEN_ETHERNET
            )));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[CHADDR_OFFSET..SNAME_OFFSET]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[SNAME_OFFSET..FILE_OFFSET]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[FILE_OFFSET..COOKIE_OFFSET]);

        let mut options = parse_options(&data[HEADER_SIZE..])?;
        let overload = options.iter().find_map(|option| match option {
            Dhcp4Option::OptionOverload(flag) => Some(*flag),
            _ => None,
        });
        if let Some(flag) = overload {
            if matches!(flag, OverloadFlag::File | OverloadFlag::Both) {
                options.extend(parse_options(&file)?);
            }
            if matches!(flag, OverloadFlag::Sname | OverloadFlag::Both) {
                options.extend(parse_options(&sname)?);
            }
        }

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: read_ipv4(data, 12),
            yiaddr: read_ipv4(data, 16),
            siaddr: read_ipv4(data, 20),
            giaddr: read_ipv4(data, 24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Encodes the packet, terminated by End and padded to 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(576);
        packet.extend_from_slice(&[self.op, self.htype, self.hlen, self.hops]);
        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());
        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            packet.extend_from_slice(&addr.octets());
        }
        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);
        packet.extend_from_slice(&MAGIC_COOKIE);
        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }
        packet.push(OptionCode::End as u8);
        if packet.len() < MIN_PACKET_SIZE {
            packet.resize(MIN_PACKET_SIZE, 0);
        }
        packet
    }

    fn find<'a, T>(&'a self, pick: impl Fn(&'a Dhcp4Option) -> Option<T>) -> Option<T> {
        self.options.iter().find_map(pick)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.find(|option| match option {
            Dhcp4Option::MessageType(message_type) => Some(*message_type),
            _ => None,
        })
    }

    /// Requested IP address (Option 50).
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.find(|option| match option {
            Dhcp4Option::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.find(|option| match option {
            Dhcp4Option::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn client_identifier(&self) -> Option<&[u8]> {
        self.find(|option| match option {
            Dhcp4Option::ClientIdentifier(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    /// Relay agent information (Option 82), echoed in replies.
    pub fn relay_agent_info(&self) -> Option<&[u8]> {
        self.find(|option| match option {
            Dhcp4Option::RelayAgentInfo(info) => Some(info.as_slice()),
            _ => None,
        })
    }

    pub fn hostname(&self) -> Option<&str> {
        self.find(|option| match option {
            Dhcp4Option::Hostname(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Client FQDN (Option 81) flags and name.
    pub fn client_fqdn(&self) -> Option<(u8, &[u8])> {
        self.find(|option| match option {
            Dhcp4Option::ClientFqdn { flags, name } => Some((*flags, name.as_slice())),
            _ => None,
        })
    }

    pub fn vendor_class(&self) -> Option<&[u8]> {
        self.find(|option| match option {
            Dhcp4Option::VendorClass(class) => Some(class.as_slice()),
            _ => None,
        })
    }

    /// Option codes the client asked for (Option 55).
    pub fn parameter_request_list(&self) -> Option<&[u8]> {
        self.find(|option| match option {
            Dhcp4Option::ParameterRequestList(params) => Some(params.as_slice()),
            _ => None,
        })
    }

    /// Client hardware address bytes (respecting hlen).
    pub fn chaddr_bytes(&self) -> &[u8] {
        &self.chaddr[..(self.hlen as usize).min(self.chaddr.len())]
    }

    /// Hardware address as "aa:bb:cc:dd:ee:ff".
    pub fn format_mac(&self) -> String {
        self.chaddr_bytes()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Identity used for the client's binding: Option 61 if present,
    /// otherwise hardware type followed by the hardware address.
    pub fn client_id(&self) -> Vec<u8> {
        match self.client_identifier() {
            Some(id) => id.to_vec(),
            None => {
                let mut id = vec![self.htype];
                id.extend_from_slice(self.chaddr_bytes());
                id
            }
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }

    pub fn is_relayed(&self) -> bool {
        !self.giaddr.is_unspecified()
    }

    /// Builds an OFFER/ACK/NAK for `request`. The message type goes first;
    /// `xid`, `flags`, `giaddr`, `htype`, `hlen` and `chaddr` are copied.
    pub fn create_reply(
        request: &Dhcp4Packet,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<Dhcp4Option>,
    ) -> Self {
        let mut all_options = Vec::with_capacity(options.len() + 1);
        all_options.push(Dhcp4Option::MessageType(message_type));
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: all_options,
        }
    }
}

impl ClientMessage for Dhcp4Packet {
    fn option_data(&self, code: u16) -> Option<Vec<u8>> {
        let code = u8::try_from(code).ok()?;
        self.options
            .iter()
            .find(|option| option.code() == code)
            .map(Dhcp4Option::payload)
    }

    fn client_classes(&self) -> Vec<Vec<u8>> {
        self.vendor_class().map(|class| vec![class.to_vec()]).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A request with the given message type followed by `extra` raw
    /// option bytes.
    fn request_bytes(message_type: MessageType, extra: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_SIZE];
        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[10..12].copy_from_slice(&BROADCAST_FLAG.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[COOKIE_OFFSET..HEADER_SIZE].copy_from_slice(&MAGIC_COOKIE);
        packet.extend_from_slice(&[OptionCode::MessageType as u8, 1, message_type as u8]);
        packet.extend_from_slice(extra);
        packet.push(OptionCode::End as u8);
        packet
    }

    #[test]
    fn test_discover_parses_header_fields() {
        let data = request_bytes(MessageType::Discover, &[50, 4, 192, 168, 1, 100, 12, 4, b'h', b'o', b's', b't']);
        let packet = Dhcp4Packet::parse(&data).unwrap();

        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.xid, 0x12345678);
        assert!(packet.is_broadcast());
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(packet.hostname(), Some("host"));
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");

        let encoded = packet.encode();
        assert!(encoded.len() >= MIN_PACKET_SIZE);
        assert_eq!(Dhcp4Packet::parse(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(Dhcp4Packet::parse(&[0u8; 100]).is_err());
        assert!(Dhcp4Packet::parse(&[0u8; 239]).is_err());
        assert!(Dhcp4Packet::parse(&[0u8; 300]).is_err());

        let mut packet = request_bytes(MessageType::Discover, &[]);
        packet[2] = 7;
        assert!(Dhcp4Packet::parse(&packet).is_err());

        let mut packet = request_bytes(MessageType::Discover, &[]);
        packet[3] = 17;
        assert!(Dhcp4Packet::parse(&packet).is_err());
    }

    #[test]
    fn test_truncated_options_rejected() {
        let mut packet = request_bytes(MessageType::Discover, &[]);
        packet.pop();
        packet.push(OptionCode::LeaseTime as u8);
        assert!(Dhcp4Packet::parse(&packet).is_err());

        packet.extend_from_slice(&[4, 0, 0]);
        assert!(Dhcp4Packet::parse(&packet).is_err());
    }

    #[test]
    fn test_client_id() {
        let packet = Dhcp4Packet::parse(&request_bytes(MessageType::Discover, &[])).unwrap();
        assert_eq!(packet.client_id(), vec![1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let with_option = request_bytes(MessageType::Discover, &[61, 3, 0xff, 0x01, 0x02]);
        let packet = Dhcp4Packet::parse(&with_option).unwrap();
        assert_eq!(packet.client_id(), vec![0xff, 0x01, 0x02]);
    }

    #[test]
    fn test_option_overload_file_and_sname() {
        let mut packet = request_bytes(MessageType::Discover, &[52, 1, 3]);
        packet[SNAME_OFFSET..SNAME_OFFSET + 7].copy_from_slice(&[12, 5, b's', b'n', b'a', b'm', b'e']);
        packet[SNAME_OFFSET + 7] = OptionCode::End as u8;
        packet[FILE_OFFSET..FILE_OFFSET + 8].copy_from_slice(&[60, 6, b'v', b'e', b'n', b'd', b'o', b'r']);
        packet[FILE_OFFSET + 8] = OptionCode::End as u8;

        let parsed = Dhcp4Packet::parse(&packet).unwrap();
        assert_eq!(parsed.hostname(), Some("sname"));
        assert_eq!(parsed.vendor_class(), Some(&b"vendor"[..]));
    }

    #[test]
    fn test_create_reply_copies_request_fields() {
        let mut data = request_bytes(MessageType::Discover, &[]);
        data[24..28].copy_from_slice(&[192, 168, 2, 1]);
        let request = Dhcp4Packet::parse(&data).unwrap();

        let offer = Dhcp4Packet::create_reply(
            &request,
            MessageType::Offer,
            Ipv4Addr::new(192, 168, 1, 100),
            Ipv4Addr::new(192, 168, 1, 1),
            vec![Dhcp4Option::LeaseTime(3600)],
        );

        assert_eq!(offer.op, BOOTREPLY);
        assert_eq!(offer.xid, request.xid);
        assert_eq!(offer.flags, request.flags);
        assert_eq!(offer.giaddr, Ipv4Addr::new(192, 168, 2, 1));
        assert_eq!(offer.chaddr, request.chaddr);
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.options.len(), 2);
        assert!(offer.is_relayed());
    }

    #[test]
    fn test_client_message_option_data() {
        let data = request_bytes(MessageType::Discover, &[60, 4, b'M', b'S', b'F', b'T', 200, 2, 0xde, 0xad]);
        let packet = Dhcp4Packet::parse(&data).unwrap();

        assert_eq!(packet.option_data(200), Some(vec![0xde, 0xad]));
        assert_eq!(packet.option_data(53), Some(vec![1]));
        assert_eq!(packet.option_data(999), None);
        assert_eq!(packet.client_classes(), vec![b"MSFT".to_vec()]);
    }

    #[test]
    fn test_reply_fields_land_at_wire_offsets() {
        let packet = Dhcp4Packet {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 3,
            xid: 0x12345678,
            secs: 999,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::new(192, 168, 1, 10),
            yiaddr: Ipv4Addr::new(192, 168, 1, 20),
            siaddr: Ipv4Addr::new(192, 168, 1, 1),
            giaddr: Ipv4Addr::new(192, 168, 2, 1),
            chaddr: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![Dhcp4Option::MessageType(MessageType::Offer)],
        };

        let encoded = packet.encode();
        assert_eq!(&encoded[4..8], &0x12345678u32.to_be_bytes());
        assert_eq!(&encoded[8..10], &999u16.to_be_bytes());
        assert_eq!(&encoded[12..16], &[192, 168, 1, 10]);
        assert_eq!(&encoded[16..20], &[192, 168, 1, 20]);
        assert_eq!(&encoded[24..28], &[192, 168, 2, 1]);
        assert_eq!(&encoded[28..34], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&encoded[COOKIE_OFFSET..HEADER_SIZE], &MAGIC_COOKIE);
        assert_eq!(&encoded[HEADER_SIZE..HEADER_SIZE + 4], &[53, 1, 2, 255]);
    }
}
