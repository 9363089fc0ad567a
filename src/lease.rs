//! Persisted lease records.
//!
//! A [`Lease`] is the flat projection of one [`BindingObject`] together with
//! the identity fields of its parent [`Binding`]. It is the unit exchanged
//! with the lease store and the write-through cache; the binding managers
//! convert between the two representations.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::binding::{
    Binding, BindingObject, BindingResource, IaKey, IaType, LeaseState, RawOption,
};
use crate::range::Range;

/// Encodes a client ID as a colon-separated hex string for storage.
pub fn encode_client_id(client_id: &[u8]) -> String {
    client_id
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// Decodes a client ID written by [`encode_client_id`].
pub fn decode_client_id(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(text.replace(':', ""))
}

mod client_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_client_id(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_client_id(&text).map_err(serde::de::Error::custom)
    }
}

/// One leased address or prefix as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Address, or the first address of a delegated prefix.
    pub ip: IpAddr,

    /// 32 or 128 for addresses, the delegated length for prefixes.
    pub prefix_length: u8,

    /// DUID (v6) or client identifier / hardware address (v4).
    #[serde(with = "client_id_hex")]
    pub client_id: Vec<u8>,

    pub ia_type: IaType,

    pub iaid: u32,

    pub state: LeaseState,

    /// Name of the link the lease was made on.
    #[serde(default)]
    pub link: String,

    pub start_time: DateTime<Utc>,

    pub preferred_end_time: DateTime<Utc>,

    pub valid_end_time: DateTime<Utc>,

    #[serde(default)]
    pub options: Vec<RawOption>,
}

impl Lease {
    /// Projects one object of a binding into a storable record.
    pub fn from_object(binding: &Binding, object: &BindingObject) -> Self {
        Self {
            ip: object.ip(),
            prefix_length: object.resource.prefix_length(),
            client_id: binding.client_id.clone(),
            ia_type: binding.ia_type,
            iaid: binding.iaid,
            state: object.state,
            link: binding.link.clone(),
            start_time: object.start_time,
            preferred_end_time: object.preferred_end_time,
            valid_end_time: object.valid_end_time,
            options: object.options.clone(),
        }
    }

    /// Rebuilds the binding object, attaching it to the pool it came from.
    pub fn to_object(&self, pool: Range) -> BindingObject {
        let resource = match (self.ia_type, self.ip) {
            (IaType::Pd, IpAddr::V6(prefix)) => BindingResource::Prefix {
                prefix,
                length: self.prefix_length,
            },
            (_, ip) => BindingResource::Address(ip),
        };
        BindingObject {
            resource,
            pool,
            state: self.state,
            start_time: self.start_time,
            preferred_end_time: self.preferred_end_time,
            valid_end_time: self.valid_end_time,
            options: self.options.clone(),
        }
    }

    pub fn key(&self) -> IaKey {
        IaKey::new(&self.client_id, self.ia_type, self.iaid)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.valid_end_time
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self) -> i64 {
        let remaining = self.valid_end_time - Utc::now();
        remaining.num_seconds().max(0)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ia_type == IaType::Pd {
            write!(f, "{}/{}", self.ip, self.prefix_length)?;
        } else {
            write!(f, "{}", self.ip)?;
        }
        write!(
            f,
            " {} iaid={} client={} {}",
            self.ia_type,
            self.iaid,
            encode_client_id(&self.client_id),
            self.state
        )
    }
}
