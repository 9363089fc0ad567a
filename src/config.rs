//! Server configuration.
//!
//! Loaded once at startup from a JSON file. The layout mirrors the policy
//! and option scoping: global values, then per-link values, then per-pool
//! and per-filter overrides.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::binding::IaType;
use crate::cache::DEFAULT_CACHE_SIZE;
use crate::error::{Error, Result};
use crate::range::{AddressRange, PrefixRange, Range};

/// Policy values by key, e.g. `"dhcp.v6.ia-na-t1" -> "0.5"`.
pub type PolicyMap = BTreeMap<String, String>;

fn default_v4_port() -> u16 {
    67
}

fn default_v6_port() -> u16 {
    547
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn subnet(text: &str) -> IpNet {
    text.parse()
        .unwrap_or_else(|_| IpNet::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub policies: PolicyMap,
    #[serde(default)]
    pub options: OptionSet,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// JSON lease file; leases are kept in memory only when absent.
    #[serde(default)]
    pub leases_file: Option<String>,
    /// Entries per LRU cache; 0 disables caching.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// DHCPv4 server identifier (Option 54) and source address.
    #[serde(default)]
    pub v4_address: Option<Ipv4Addr>,
    /// DHCPv6 server DUID as hex.
    #[serde(default)]
    pub duid: Option<String>,
    /// Interface the server listens on; links naming it are reached
    /// through link-local addresses.
    #[serde(default)]
    pub interface: Option<String>,
    /// Interface index for Windows socket binding.
    #[serde(default)]
    pub interface_index: Option<u32>,
    /// Global v6 address of the listening interface.
    #[serde(default)]
    pub v6_address: Option<Ipv6Addr>,
    #[serde(default = "default_v4_port")]
    pub v4_port: u16,
    #[serde(default = "default_v6_port")]
    pub v6_port: u16,
}

/// Options handed to clients. Later scopes override set fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers_v6: Vec<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl OptionSet {
    /// Overlays `other` on `self`: every field set in `other` wins.
    pub fn merge(&mut self, other: &OptionSet) {
        if !other.dns_servers_v6.is_empty() {
            self.dns_servers_v6 = other.dns_servers_v6.clone();
        }
        if !other.domain_search.is_empty() {
            self.domain_search = other.domain_search.clone();
        }
        if !other.routers.is_empty() {
            self.routers = other.routers.clone();
        }
        if !other.dns_servers.is_empty() {
            self.dns_servers = other.dns_servers.clone();
        }
        if other.domain_name.is_some() {
            self.domain_name = other.domain_name.clone();
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
    }
}

/// An address pool written as `"start-end"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub range: String,
    #[serde(default)]
    pub policies: PolicyMap,
    #[serde(default)]
    pub options: OptionSet,
}

/// A prefix delegation pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixPoolConfig {
    pub prefix: Ipv6Net,
    pub delegated_length: u8,
    #[serde(default)]
    pub policies: PolicyMap,
    #[serde(default)]
    pub options: OptionSet,
}

/// Pools of every kind, either directly on a link or scoped to a filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub na_pools: Vec<PoolConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ta_pools: Vec<PoolConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pd_pools: Vec<PrefixPoolConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub v4_pools: Vec<PoolConfig>,
}

impl PoolSet {
    /// Every pool as `(kind, range, policies, options)` in declaration order.
    pub fn ranges(&self) -> Result<Vec<(IaType, Range, &PolicyMap, &OptionSet)>> {
        let mut ranges = Vec::new();
        for (ia_type, pools) in [
            (IaType::Na, &self.na_pools),
            (IaType::Ta, &self.ta_pools),
            (IaType::V4, &self.v4_pools),
        ] {
            for pool in pools {
                let range: AddressRange = pool.range.parse()?;
                if range.is_ipv4() != (ia_type == IaType::V4) {
                    return Err(Error::InvalidConfig(format!(
                        "{} pool {} has the wrong address family",
                        ia_type, range
                    )));
                }
                ranges.push((ia_type, Range::Address(range), &pool.policies, &pool.options));
            }
        }
        for pool in &self.pd_pools {
            let range = PrefixRange::new(pool.prefix, pool.delegated_length)?;
            ranges.push((IaType::Pd, Range::Prefix(range), &pool.policies, &pool.options));
        }
        Ok(ranges)
    }
}

/// How a filter expression compares option data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    #[default]
    Equals,
    StartsWith,
    Contains,
    Exists,
}

/// One condition of a filter. All conditions of a filter must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterExpression {
    /// Compares the payload of option `code` against `hex` or `text`.
    Option {
        code: u16,
        #[serde(default)]
        operator: MatchOperator,
        #[serde(default)]
        hex: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    /// Matches a v4 vendor class or a v6 user/vendor class.
    ClientClass { class: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    pub expressions: Vec<FilterExpression>,
    #[serde(default)]
    pub policies: PolicyMap,
    #[serde(default)]
    pub options: OptionSet,
    #[serde(flatten)]
    pub pools: PoolSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub subnet: IpNet,
    /// Interface the link is attached to, for link-local resolution.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub policies: PolicyMap,
    #[serde(default)]
    pub options: OptionSet,
    #[serde(flatten)]
    pub pools: PoolSet,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                v4_address: Some(Ipv4Addr::new(192, 168, 1, 1)),
                duid: Some("000100012e5a1f40001122334455".to_string()),
                interface: None,
                interface_index: None,
                v6_address: Some(Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1)),
                v4_port: default_v4_port(),
                v6_port: default_v6_port(),
            },
            policies: PolicyMap::new(),
            options: OptionSet {
                dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
                ..OptionSet::default()
            },
            links: vec![
                LinkConfig {
                    name: "lan-v4".to_string(),
                    subnet: subnet("192.168.1.0/24"),
                    interface: None,
                    policies: PolicyMap::new(),
                    options: OptionSet {
                        routers: vec![Ipv4Addr::new(192, 168, 1, 1)],
                        ..OptionSet::default()
                    },
                    pools: PoolSet {
                        v4_pools: vec![PoolConfig {
                            range: "192.168.1.100-192.168.1.200".to_string(),
                            policies: PolicyMap::new(),
                            options: OptionSet::default(),
                        }],
                        ..PoolSet::default()
                    },
                    filters: Vec::new(),
                },
                LinkConfig {
                    name: "lan-v6".to_string(),
                    subnet: subnet("2001:db8:1::/64"),
                    interface: None,
                    policies: PolicyMap::new(),
                    options: OptionSet::default(),
                    pools: PoolSet {
                        na_pools: vec![PoolConfig {
                            range: "2001:db8:1::100-2001:db8:1::1ff".to_string(),
                            policies: PolicyMap::new(),
                            options: OptionSet::default(),
                        }],
                        ..PoolSet::default()
                    },
                    filters: Vec::new(),
                },
            ],
            leases_file: Some("leases.json".to_string()),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl Config {
    /// Loads and validates `path`, or writes and returns the default
    /// configuration if the file does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Decoded server DUID, if configured.
    pub fn server_duid(&self) -> Result<Option<Vec<u8>>> {
        match &self.server.duid {
            Some(duid) => Ok(Some(hex::decode(duid.replace(':', ""))?)),
            None => Ok(None),
        }
    }

    /// Checks everything the server relies on at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a missing server identifier,
    /// malformed or inverted ranges, pools outside their family, or pools
    /// of the same kind overlapping within a link.
    pub fn validate(&self) -> Result<()> {
        let mut has_v4 = false;
        let mut has_v6 = false;
        let mut names = std::collections::HashSet::new();

        for link in &self.links {
            if !names.insert(link.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate link name '{}'",
                    link.name
                )));
            }

            let mut ranges = link.pools.ranges()?;
            for filter in &link.filters {
                if filter.expressions.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "filter '{}' on link '{}' has no expressions",
                        filter.name, link.name
                    )));
                }
                for expression in &filter.expressions {
                    if let FilterExpression::Option { hex: Some(data), .. } = expression {
                        hex::decode(data)?;
                    }
                }
                ranges.extend(filter.pools.ranges()?);
            }

            for (index, (ia_type, range, _, _)) in ranges.iter().enumerate() {
                has_v4 |= *ia_type == IaType::V4;
                has_v6 |= *ia_type != IaType::V4;
                for (other_type, other, _, _) in &ranges[index + 1..] {
                    if ia_type == other_type && range.overlaps(other) {
                        return Err(Error::InvalidConfig(format!(
                            "{} pools {} and {} overlap on link '{}'",
                            ia_type, range, other, link.name
                        )));
                    }
                }
                if *ia_type != IaType::Pd && !link.subnet.contains(&range.first()) {
                    tracing::warn!(
                        "Pool {} lies outside subnet {} of link '{}'",
                        range,
                        link.subnet,
                        link.name
                    );
                }
            }
        }

        if has_v4 && self.server.v4_address.is_none() {
            return Err(Error::InvalidConfig(
                "server.v4_address is required when v4 pools are configured".to_string(),
            ));
        }
        if has_v6 {
            match self.server_duid()? {
                Some(duid) if !duid.is_empty() => {}
                _ => {
                    return Err(Error::InvalidConfig(
                        "server.duid is required when v6 pools are configured".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every configured pool range, across all links and filters.
    pub fn all_ranges(&self) -> Result<Vec<Range>> {
        let mut all = Vec::new();
        for link in &self.links {
            all.extend(link.pools.ranges()?.into_iter().map(|(_, range, _, _)| range));
            for filter in &link.filters {
                all.extend(filter.pools.ranges()?.into_iter().map(|(_, range, _, _)| range));
            }
        }
        Ok(all)
    }

    pub fn link(&self, name: &str) -> Option<&LinkConfig> {
        self.links.iter().find(|link| link.name == name)
    }

    /// Subnet mask of a v4 link, for Option 1.
    pub fn subnet_mask(subnet: &IpNet) -> Option<Ipv4Addr> {
        match subnet {
            IpNet::V4(net) => Some(net.netmask()),
            IpNet::V6(_) => None,
        }
    }

    /// Broadcast address of a v4 link, for Option 28.
    pub fn broadcast(subnet: &IpNet) -> Option<IpAddr> {
        match subnet {
            IpNet::V4(net) => Some(IpAddr::V4(net.broadcast())),
            IpNet::V6(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(range: &str) -> PoolConfig {
        PoolConfig {
            range: range.to_string(),
            policies: PolicyMap::new(),
            options: OptionSet::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.all_ranges().unwrap().len(), 2);
        assert_eq!(config.server_duid().unwrap().unwrap().len(), 14);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut config = Config::default();
        config.links[0].pools.v4_pools = vec![pool("192.168.1.200-192.168.1.100")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_pools_rejected() {
        let mut config = Config::default();
        config.links[1].pools.na_pools = vec![
            pool("2001:db8:1::100-2001:db8:1::1ff"),
            pool("2001:db8:1::180-2001:db8:1::2ff"),
        ];
        assert!(config.validate().is_err());

        config.links[1].pools.na_pools = vec![pool("2001:db8:1::100-2001:db8:1::1ff")];
        config.links[1].pools.ta_pools = vec![pool("2001:db8:1::180-2001:db8:1::2ff")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wrong_family_rejected() {
        let mut config = Config::default();
        config.links[1].pools.na_pools = vec![pool("10.0.0.1-10.0.0.9")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_server_identifiers_rejected() {
        let mut config = Config::default();
        config.server.duid = None;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.v4_address = None;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.duid = Some("not hex".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_option_set_merge() {
        let mut base = OptionSet {
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            mtu: Some(1500),
            ..OptionSet::default()
        };
        base.merge(&OptionSet {
            dns_servers: vec![Ipv4Addr::new(1, 1, 1, 1)],
            domain_name: Some("lab.local".to_string()),
            ..OptionSet::default()
        });
        assert_eq!(base.dns_servers, vec![Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(base.mtu, Some(1500));
        assert_eq!(base.domain_name.as_deref(), Some("lab.local"));
    }

    #[test]
    fn test_config_json_shape() {
        let json = r#"{
            "server": { "duid": "00:03:00:01:aa:bb:cc:dd:ee:ff" },
            "policies": { "dhcp.v6.support-rapid-commit": "true" },
            "links": [{
                "name": "lab",
                "subnet": "2001:db8:2::/64",
                "na_pools": [{ "range": "2001:db8:2::10-2001:db8:2::20" }],
                "pd_pools": [{ "prefix": "2001:db8:200::/48", "delegated_length": 56 }],
                "filters": [{
                    "name": "printers",
                    "expressions": [{ "type": "client_class", "class": "printer" }],
                    "ta_pools": [{ "range": "2001:db8:2::100-2001:db8:2::110" }]
                }]
            }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.v6_port, 547);
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.all_ranges().unwrap().len(), 3);
        assert_eq!(config.links[0].filters[0].pools.ta_pools.len(), 1);
    }
}
