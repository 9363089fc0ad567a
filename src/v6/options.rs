//! DHCPv6 options (RFC 3315, RFC 3633, RFC 3646, RFC 4704).
//!
//! Options are a 16-bit code, a 16-bit length and the payload. IA options
//! carry nested options (addresses, prefixes, status codes); all three IA
//! kinds decode into the single [`Ia`] type, distinguished by its
//! [`IaType`].

use std::fmt;
use std::net::Ipv6Addr;

use crate::binding::IaType;
use crate::error::{Error, Result};

/// DHCPv6 option codes understood by this server.
pub mod code {
    pub const CLIENT_ID: u16 = 1;
    pub const SERVER_ID: u16 = 2;
    pub const IA_NA: u16 = 3;
    pub const IA_TA: u16 = 4;
    pub const IAADDR: u16 = 5;
    pub const ORO: u16 = 6;
    pub const PREFERENCE: u16 = 7;
    pub const ELAPSED_TIME: u16 = 8;
    pub const STATUS_CODE: u16 = 13;
    pub const RAPID_COMMIT: u16 = 14;
    pub const USER_CLASS: u16 = 15;
    pub const VENDOR_CLASS: u16 = 16;
    pub const DNS_SERVERS: u16 = 23;
    pub const DOMAIN_LIST: u16 = 24;
    pub const IA_PD: u16 = 25;
    pub const IAPREFIX: u16 = 26;
    pub const CLIENT_FQDN: u16 = 39;
}

/// Status codes (RFC 3315 §24.4, RFC 3633 §16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    UnspecFail,
    NoAddrsAvail,
    NoBinding,
    NotOnLink,
    UseMulticast,
    NoPrefixAvail,
    Other(u16),
}

impl From<u16> for StatusCode {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::UnspecFail,
            2 => Self::NoAddrsAvail,
            3 => Self::NoBinding,
            4 => Self::NotOnLink,
            5 => Self::UseMulticast,
            6 => Self::NoPrefixAvail,
            other => Self::Other(other),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Success => 0,
            StatusCode::UnspecFail => 1,
            StatusCode::NoAddrsAvail => 2,
            StatusCode::NoBinding => 3,
            StatusCode::NotOnLink => 4,
            StatusCode::UseMulticast => 5,
            StatusCode::NoPrefixAvail => 6,
            StatusCode::Other(value) => value,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::UnspecFail => f.write_str("UnspecFail"),
            Self::NoAddrsAvail => f.write_str("NoAddrsAvail"),
            Self::NoBinding => f.write_str("NoBinding"),
            Self::NotOnLink => f.write_str("NotOnLink"),
            Self::UseMulticast => f.write_str("UseMulticast"),
            Self::NoPrefixAvail => f.write_str("NoPrefixAvail"),
            Self::Other(value) => write!(f, "Status({})", value),
        }
    }
}

/// IAADDR option contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaAddress {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: Vec<Dhcp6Option>,
}

/// IAPREFIX option contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaPrefix {
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub prefix_length: u8,
    pub prefix: Ipv6Addr,
    pub options: Vec<Dhcp6Option>,
}

/// An IA_NA, IA_TA or IA_PD option. `t1`/`t2` are not sent for IA_TA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ia {
    pub ia_type: IaType,
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<Dhcp6Option>,
}

impl Ia {
    /// An empty IA of the same kind and IA-ID, used to build replies.
    pub fn empty(ia_type: IaType, iaid: u32) -> Self {
        Self {
            ia_type,
            iaid,
            t1: 0,
            t2: 0,
            options: Vec::new(),
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = &IaAddress> {
        self.options.iter().filter_map(|option| match option {
            Dhcp6Option::IaAddr(address) => Some(address),
            _ => None,
        })
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &IaPrefix> {
        self.options.iter().filter_map(|option| match option {
            Dhcp6Option::IaPrefix(prefix) => Some(prefix),
            _ => None,
        })
    }

    /// True when the IA carries at least one address or prefix.
    pub fn has_resources(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, Dhcp6Option::IaAddr(_) | Dhcp6Option::IaPrefix(_)))
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::StatusCode { status, .. } => Some(*status),
            _ => None,
        })
    }

    /// Replaces any status code in the IA.
    pub fn set_status(&mut self, status: StatusCode, message: impl Into<String>) {
        self.options
            .retain(|option| !matches!(option, Dhcp6Option::StatusCode { .. }));
        self.options.push(Dhcp6Option::StatusCode {
            status,
            message: message.into(),
        });
    }

    fn code(&self) -> u16 {
        match self.ia_type {
            IaType::Ta => code::IA_TA,
            IaType::Pd => code::IA_PD,
            IaType::Na | IaType::V4 => code::IA_NA,
        }
    }
}

/// A decoded DHCPv6 option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6Option {
    ClientId(Vec<u8>),
    ServerId(Vec<u8>),
    Ia(Ia),
    IaAddr(IaAddress),
    /// Option Request Option: codes the client wants.
    Oro(Vec<u16>),
    Preference(u8),
    /// Hundredths of a second since the client began the exchange.
    ElapsedTime(u16),
    StatusCode { status: StatusCode, message: String },
    RapidCommit,
    UserClass(Vec<Vec<u8>>),
    VendorClass { enterprise: u32, data: Vec<Vec<u8>> },
    DnsServers(Vec<Ipv6Addr>),
    DomainList(Vec<String>),
    IaPrefix(IaPrefix),
    /// Flags and the domain name in DNS wire format.
    ClientFqdn { flags: u8, name: Vec<u8> },
    Unknown(u16, Vec<u8>),
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn ipv6_at(data: &[u8], at: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[at..at + 16]);
    Ipv6Addr::from(octets)
}

fn require(data: &[u8], min: usize, what: &str) -> Result<()> {
    if data.len() < min {
        return Err(Error::InvalidPacket(format!(
            "{} option too short: {} bytes",
            what,
            data.len()
        )));
    }
    Ok(())
}

/// Splits a buffer of length-prefixed opaque items (user/vendor class).
fn parse_opaque_list(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    let mut index = 0;
    while index < data.len() {
        require(&data[index..], 2, "class data")?;
        let length = be_u16(data, index) as usize;
        let start = index + 2;
        if start + length > data.len() {
            return Err(Error::InvalidPacket("Class data truncated".to_string()));
        }
        items.push(data[start..start + length].to_vec());
        index = start + length;
    }
    Ok(items)
}

fn encode_opaque_list(items: &[Vec<u8>], out: &mut Vec<u8>) {
    for item in items {
        out.extend_from_slice(&(item.len() as u16).to_be_bytes());
        out.extend_from_slice(item);
    }
}

/// Decodes one uncompressed DNS name, returning it and the bytes consumed.
pub fn decode_domain_name(data: &[u8]) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut index = 0;
    loop {
        let Some(&length) = data.get(index) else {
            // Partial names (RFC 4704 §4.2) end without the root label.
            return Ok((labels.join("."), index));
        };
        index += 1;
        if length == 0 {
            return Ok((labels.join("."), index));
        }
        let end = index + length as usize;
        if length > 63 || end > data.len() {
            return Err(Error::InvalidPacket("Invalid domain name label".to_string()));
        }
        labels.push(String::from_utf8_lossy(&data[index..end]).to_string());
        index = end;
    }
}

/// Encodes a fully qualified DNS name in wire format.
pub fn encode_domain_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.trim_end_matches('.').split('.').filter(|label| !label.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
    out.push(0);
    out
}

/// Parses a sequence of options filling `data`.
pub fn parse_options(data: &[u8]) -> Result<Vec<Dhcp6Option>> {
    let mut options = Vec::new();
    let mut index = 0;
    while index < data.len() {
        if index + 4 > data.len() {
            return Err(Error::InvalidPacket("Option header truncated".to_string()));
        }
        let code = be_u16(data, index);
        let length = be_u16(data, index + 2) as usize;
        let start = index + 4;
        if start + length > data.len() {
            return Err(Error::InvalidPacket(format!(
                "Option {} data truncated",
                code
            )));
        }
        options.push(Dhcp6Option::parse(code, &data[start..start + length])?);
        index = start + length;
    }
    Ok(options)
}

/// Encodes a sequence of options.
pub fn encode_options(options: &[Dhcp6Option], out: &mut Vec<u8>) {
    for option in options {
        option.encode_into(out);
    }
}

impl Dhcp6Option {
    pub fn code(&self) -> u16 {
        match self {
            Self::ClientId(_) => code::CLIENT_ID,
            Self::ServerId(_) => code::SERVER_ID,
            Self::Ia(ia) => ia.code(),
            Self::IaAddr(_) => code::IAADDR,
            Self::Oro(_) => code::ORO,
            Self::Preference(_) => code::PREFERENCE,
            Self::ElapsedTime(_) => code::ELAPSED_TIME,
            Self::StatusCode { .. } => code::STATUS_CODE,
            Self::RapidCommit => code::RAPID_COMMIT,
            Self::UserClass(_) => code::USER_CLASS,
            Self::VendorClass { .. } => code::VENDOR_CLASS,
            Self::DnsServers(_) => code::DNS_SERVERS,
            Self::DomainList(_) => code::DOMAIN_LIST,
            Self::IaPrefix(_) => code::IAPREFIX,
            Self::ClientFqdn { .. } => code::CLIENT_FQDN,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Decodes one option payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] for payloads too short for their
    /// fixed fields or with malformed nested options.
    pub fn parse(option_code: u16, data: &[u8]) -> Result<Self> {
        let option = match option_code {
            code::CLIENT_ID => Self::ClientId(data.to_vec()),
            code::SERVER_ID => Self::ServerId(data.to_vec()),
            code::IA_NA | code::IA_PD => {
                require(data, 12, "IA")?;
                Self::Ia(Ia {
                    ia_type: if option_code == code::IA_NA {
                        IaType::Na
                    } else {
                        IaType::Pd
                    },
                    iaid: be_u32(data, 0),
                    t1: be_u32(data, 4),
                    t2: be_u32(data, 8),
                    options: parse_options(&data[12..])?,
                })
            }
            code::IA_TA => {
                require(data, 4, "IA_TA")?;
                Self::Ia(Ia {
                    ia_type: IaType::Ta,
                    iaid: be_u32(data, 0),
                    t1: 0,
                    t2: 0,
                    options: parse_options(&data[4..])?,
                })
            }
            code::IAADDR => {
                require(data, 24, "IAADDR")?;
                Self::IaAddr(IaAddress {
                    address: ipv6_at(data, 0),
                    preferred_lifetime: be_u32(data, 16),
                    valid_lifetime: be_u32(data, 20),
                    options: parse_options(&data[24..])?,
                })
            }
            code::IAPREFIX => {
                require(data, 25, "IAPREFIX")?;
                Self::IaPrefix(IaPrefix {
                    preferred_lifetime: be_u32(data, 0),
                    valid_lifetime: be_u32(data, 4),
                    prefix_length: data[8],
                    prefix: ipv6_at(data, 9),
                    options: parse_options(&data[25..])?,
                })
            }
            code::ORO => {
                if !data.len().is_multiple_of(2) {
                    return Err(Error::InvalidPacket("Invalid ORO length".to_string()));
                }
                Self::Oro(data.chunks_exact(2).map(|pair| be_u16(pair, 0)).collect())
            }
            code::PREFERENCE => match data {
                [value] => Self::Preference(*value),
                _ => return Err(Error::InvalidPacket("Invalid preference length".to_string())),
            },
            code::ELAPSED_TIME => match data {
                [high, low] => Self::ElapsedTime(u16::from_be_bytes([*high, *low])),
                _ => {
                    return Err(Error::InvalidPacket(
                        "Invalid elapsed time length".to_string(),
                    ));
                }
            },
            code::STATUS_CODE => {
                require(data, 2, "status code")?;
                Self::StatusCode {
                    status: StatusCode::from(be_u16(data, 0)),
                    message: String::from_utf8_lossy(&data[2..]).to_string(),
                }
            }
            code::RAPID_COMMIT => Self::RapidCommit,
            code::USER_CLASS => Self::UserClass(parse_opaque_list(data)?),
            code::VENDOR_CLASS => {
                require(data, 4, "vendor class")?;
                Self::VendorClass {
                    enterprise: be_u32(data, 0),
                    data: parse_opaque_list(&data[4..])?,
                }
            }
            code::DNS_SERVERS => {
                if !data.len().is_multiple_of(16) {
                    return Err(Error::InvalidPacket(
                        "Invalid DNS servers length".to_string(),
                    ));
                }
                Self::DnsServers((0..data.len()).step_by(16).map(|at| ipv6_at(data, at)).collect())
            }
            code::DOMAIN_LIST => {
                let mut names = Vec::new();
                let mut index = 0;
                while index < data.len() {
                    let (name, used) = decode_domain_name(&data[index..])?;
                    names.push(name);
                    index += used;
                }
                Self::DomainList(names)
            }
            code::CLIENT_FQDN => {
                require(data, 1, "client FQDN")?;
                Self::ClientFqdn {
                    flags: data[0],
                    name: data[1..].to_vec(),
                }
            }
            other => Self::Unknown(other, data.to_vec()),
        };
        Ok(option)
    }

    /// The option payload, without code and length.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::ClientId(data) | Self::ServerId(data) | Self::Unknown(_, data) => {
                out.extend_from_slice(data)
            }
            Self::Ia(ia) => {
                out.extend_from_slice(&ia.iaid.to_be_bytes());
                if ia.ia_type != IaType::Ta {
                    out.extend_from_slice(&ia.t1.to_be_bytes());
                    out.extend_from_slice(&ia.t2.to_be_bytes());
                }
                encode_options(&ia.options, &mut out);
            }
            Self::IaAddr(address) => {
                out.extend_from_slice(&address.address.octets());
                out.extend_from_slice(&address.preferred_lifetime.to_be_bytes());
                out.extend_from_slice(&address.valid_lifetime.to_be_bytes());
                encode_options(&address.options, &mut out);
            }
            Self::IaPrefix(prefix) => {
                out.extend_from_slice(&prefix.preferred_lifetime.to_be_bytes());
                out.extend_from_slice(&prefix.valid_lifetime.to_be_bytes());
                out.push(prefix.prefix_length);
                out.extend_from_slice(&prefix.prefix.octets());
                encode_options(&prefix.options, &mut out);
            }
            Self::Oro(codes) => {
                for code in codes {
                    out.extend_from_slice(&code.to_be_bytes());
                }
            }
            Self::Preference(value) => out.push(*value),
            Self::ElapsedTime(value) => out.extend_from_slice(&value.to_be_bytes()),
            Self::StatusCode { status, message } => {
                out.extend_from_slice(&u16::from(*status).to_be_bytes());
                out.extend_from_slice(message.as_bytes());
            }
            Self::RapidCommit => {}
            Self::UserClass(items) => encode_opaque_list(items, &mut out),
            Self::VendorClass { enterprise, data } => {
                out.extend_from_slice(&enterprise.to_be_bytes());
                encode_opaque_list(data, &mut out);
            }
            Self::DnsServers(servers) => {
                for server in servers {
                    out.extend_from_slice(&server.octets());
                }
            }
            Self::DomainList(names) => {
                for name in names {
                    out.extend_from_slice(&encode_domain_name(name));
                }
            }
            Self::ClientFqdn { flags, name } => {
                out.push(*flags);
                out.extend_from_slice(name);
            }
        }
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let payload = self.payload();
        out.extend_from_slice(&self.code().to_be_bytes());
        out.extend_from_slice(&(payload.len().min(u16::MAX as usize) as u16).to_be_bytes());
        out.extend_from_slice(&payload[..payload.len().min(u16::MAX as usize)]);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}
