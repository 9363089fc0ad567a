//! Links and link resolution.
//!
//! A link is a configured subnet together with its pools, filters and
//! scoped policies. Inbound messages are mapped to a link from the address
//! they arrived on: a link-local address is resolved by interface name,
//! anything else by the subnet containing it.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::debug;

use crate::binding::IaType;
use crate::config::{Config, LinkConfig, OptionSet, PolicyMap};
use crate::error::{Error, Result};
use crate::policy::{ClientMessage, Filter, PolicyScope, matching_filters};
use crate::pool::Pool;

/// True for `fe80::/10` and `169.254.0.0/16`.
pub fn is_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
    }
}

#[derive(Debug)]
pub struct Link {
    pub name: String,
    pub subnet: IpNet,
    pub interface: Option<String>,
    pub policies: PolicyMap,
    pub options: OptionSet,
    pub filters: Vec<Filter>,
    /// Link pools in declaration order, then filter pools.
    pub pools: Vec<Arc<Pool>>,
}

impl Link {
    pub fn from_config(config: &LinkConfig) -> Result<Self> {
        let mut pools = Vec::new();
        for (ia_type, range, policies, options) in config.pools.ranges()? {
            pools.push(Arc::new(Pool::new(
                ia_type,
                range,
                &config.name,
                None,
                policies.clone(),
                options.clone(),
            )));
        }

        let mut filters = Vec::with_capacity(config.filters.len());
        for filter in &config.filters {
            for (ia_type, range, policies, options) in filter.pools.ranges()? {
                pools.push(Arc::new(Pool::new(
                    ia_type,
                    range,
                    &config.name,
                    Some(&filter.name),
                    policies.clone(),
                    options.clone(),
                )));
            }
            filters.push(Filter::from_config(filter)?);
        }

        Ok(Self {
            name: config.name.clone(),
            subnet: config.subnet,
            interface: config.interface.clone(),
            policies: config.policies.clone(),
            options: config.options.clone(),
            filters,
            pools,
        })
    }

    /// Filters of this link matching `message`, in declaration order.
    pub fn matching_filters(&self, message: &dyn ClientMessage) -> Vec<&Filter> {
        matching_filters(&self.filters, message)
    }

    /// Policy scope for a message on this link: matching filters (last
    /// match first), the pool if any, the link, then `global`.
    pub fn scope<'a>(
        &'a self,
        global: &'a PolicyMap,
        pool: Option<&'a Pool>,
        filters: &[&'a Filter],
    ) -> PolicyScope<'a> {
        let mut scope = PolicyScope::new();
        for filter in filters.iter().rev() {
            scope = scope.then(&filter.policies);
        }
        if let Some(pool) = pool {
            scope = scope.then(&pool.policies);
        }
        scope.then(&self.policies).then(global)
    }

    /// Pools a client may draw from: pools of matching filters first (last
    /// match first), then unfiltered pools, each in declaration order.
    pub fn candidate_pools(&self, ia_type: IaType, filters: &[&Filter]) -> Vec<Arc<Pool>> {
        let mut candidates = Vec::new();
        for filter in filters.iter().rev() {
            candidates.extend(
                self.pools
                    .iter()
                    .filter(|pool| {
                        pool.ia_type == ia_type && pool.filter.as_deref() == Some(filter.name.as_str())
                    })
                    .cloned(),
            );
        }
        candidates.extend(
            self.pools
                .iter()
                .filter(|pool| pool.ia_type == ia_type && pool.filter.is_none())
                .cloned(),
        );
        candidates
    }

    /// The pool of kind `ia_type` containing `ip`, whatever its filter.
    pub fn find_pool(&self, ia_type: IaType, ip: IpAddr) -> Option<&Arc<Pool>> {
        self.pools
            .iter()
            .find(|pool| pool.ia_type == ia_type && pool.contains(ip))
    }

    /// Whether a client address belongs on this link. Links with a
    /// link-local subnet only vouch for addresses in their own pools.
    pub fn is_on_link(&self, ip: IpAddr) -> bool {
        if is_link_local(self.subnet.addr()) {
            self.pools.iter().any(|pool| pool.contains(ip))
        } else {
            self.subnet.contains(&ip)
        }
    }

    /// Whether a delegated prefix is valid here: it must come from one of
    /// the link's prefix pools.
    pub fn is_prefix_on_link(&self, prefix: IpAddr) -> bool {
        self.find_pool(IaType::Pd, prefix).is_some()
    }
}

/// All configured links, indexed for lookup.
#[derive(Debug, Default)]
pub struct LinkMap {
    links: Vec<Arc<Link>>,
    /// Keyed by network address, then prefix length.
    by_network: BTreeMap<(IpAddr, u8), Arc<Link>>,
}

impl LinkMap {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut map = Self::default();
        for link in &config.links {
            let link = Arc::new(Link::from_config(link)?);
            map.by_network
                .insert((link.subnet.network(), link.subnet.prefix_len()), link.clone());
            map.links.push(link);
        }
        Ok(map)
    }

    pub fn links(&self) -> &[Arc<Link>] {
        &self.links
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Link>> {
        self.links.iter().find(|link| link.name == name)
    }

    /// Resolves the link for a message received on `local`. A link-local
    /// `local` is resolved by `interface`; otherwise the subnets at or below
    /// `local` are walked downwards until one contains it, so the most
    /// specific of nested subnets wins.
    pub fn find_link(&self, local: IpAddr, interface: Option<&str>) -> Option<Arc<Link>> {
        if is_link_local(local) {
            let interface = interface?;
            let link = self
                .links
                .iter()
                .find(|link| link.interface.as_deref() == Some(interface))
                .cloned();
            if link.is_none() {
                debug!("No link configured for interface {}", interface);
            }
            return link;
        }

        self.by_network
            .range(..=(local, u8::MAX))
            .rev()
            .map(|(_, link)| link)
            .find(|link| link.subnet.contains(&local))
            .cloned()
    }

    /// Like [`LinkMap::find_link`], failing with [`Error::NoLink`].
    pub fn resolve(&self, local: IpAddr, interface: Option<&str>) -> Result<Arc<Link>> {
        self.find_link(local, interface).ok_or(Error::NoLink(local))
    }

    /// Every pool of kind `ia_type`, across links.
    pub fn pools(&self, ia_type: IaType) -> impl Iterator<Item = &Arc<Pool>> {
        self.links
            .iter()
            .flat_map(|link| link.pools.iter())
            .filter(move |pool| pool.ia_type == ia_type)
    }

    /// The pool of kind `ia_type` containing `ip`, on any link.
    pub fn find_pool(&self, ia_type: IaType, ip: IpAddr) -> Option<&Arc<Pool>> {
        self.links
            .iter()
            .find_map(|link| link.find_pool(ia_type, ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, FilterExpression, PoolConfig, PoolSet};

    fn pool(range: &str) -> PoolConfig {
        PoolConfig {
            range: range.to_string(),
            policies: PolicyMap::new(),
            options: OptionSet::default(),
        }
    }

    fn link(name: &str, subnet: &str, pools: PoolSet) -> LinkConfig {
        LinkConfig {
            name: name.to_string(),
            subnet: subnet.parse().unwrap(),
            interface: None,
            policies: PolicyMap::new(),
            options: OptionSet::default(),
            pools,
            filters: Vec::new(),
        }
    }

    fn config(links: Vec<LinkConfig>) -> Config {
        Config {
            links,
            ..Config::default()
        }
    }

    #[test]
    fn test_find_link_by_subnet() {
        let map = LinkMap::from_config(&config(vec![
            link("a", "2001:db8:1::/64", PoolSet::default()),
            link("b", "2001:db8:2::/64", PoolSet::default()),
            link("v4", "10.0.0.0/24", PoolSet::default()),
        ]))
        .unwrap();

        let found = map.find_link("2001:db8:2::55".parse().unwrap(), None).unwrap();
        assert_eq!(found.name, "b");
        let found = map.find_link("10.0.0.7".parse().unwrap(), None).unwrap();
        assert_eq!(found.name, "v4");
        assert!(map.find_link("2001:db8:3::1".parse().unwrap(), None).is_none());
        assert!(map.find_link("10.0.1.1".parse().unwrap(), None).is_none());
    }

    #[test]
    fn test_nested_subnets_pick_most_specific() {
        let map = LinkMap::from_config(&config(vec![
            link("wide", "10.0.0.0/8", PoolSet::default()),
            link("mid", "10.1.0.0/16", PoolSet::default()),
            link("same-network", "10.0.0.0/24", PoolSet::default()),
            link("later", "10.200.0.0/16", PoolSet::default()),
        ]))
        .unwrap();

        let name = |ip: &str| map.find_link(ip.parse().unwrap(), None).map(|link| link.name.clone());
        assert_eq!(name("10.1.2.3").as_deref(), Some("mid"));
        assert_eq!(name("10.0.0.9").as_deref(), Some("same-network"));
        assert_eq!(name("10.150.0.1").as_deref(), Some("wide"));
        assert_eq!(name("10.200.3.4").as_deref(), Some("later"));
        assert_eq!(name("11.0.0.1"), None);
    }

    #[test]
    fn test_link_local_resolves_by_interface() {
        let mut lan = link("lan", "2001:db8:1::/64", PoolSet::default());
        lan.interface = Some("eth0".to_string());
        let map = LinkMap::from_config(&config(vec![lan])).unwrap();

        let local = "fe80::1".parse().unwrap();
        assert_eq!(map.find_link(local, Some("eth0")).unwrap().name, "lan");
        assert!(map.find_link(local, Some("eth1")).is_none());
        assert!(map.find_link(local, None).is_none());
        assert!(matches!(map.resolve(local, None), Err(Error::NoLink(ip)) if ip == local));
    }

    #[test]
    fn test_link_local_subnet_only_vouches_for_pools() {
        let pools = PoolSet {
            na_pools: vec![pool("2001:db8:9::10-2001:db8:9::20")],
            ..PoolSet::default()
        };
        let map = LinkMap::from_config(&config(vec![link("ll", "fe80::/64", pools)])).unwrap();
        let ll = map.get("ll").unwrap();
        assert!(ll.is_on_link("2001:db8:9::15".parse().unwrap()));
        assert!(!ll.is_on_link("fe80::15".parse().unwrap()));
    }

    #[test]
    fn test_filter_pools_come_first() {
        let mut lan = link(
            "lan",
            "10.0.0.0/24",
            PoolSet {
                v4_pools: vec![pool("10.0.0.100-10.0.0.199")],
                ..PoolSet::default()
            },
        );
        lan.filters.push(FilterConfig {
            name: "phones".to_string(),
            expressions: vec![FilterExpression::ClientClass {
                class: "phone".to_string(),
            }],
            policies: PolicyMap::new(),
            options: OptionSet::default(),
            pools: PoolSet {
                v4_pools: vec![pool("10.0.0.200-10.0.0.250")],
                ..PoolSet::default()
            },
        });
        let map = LinkMap::from_config(&config(vec![lan])).unwrap();
        let lan = map.get("lan").unwrap();

        let unfiltered = lan.candidate_pools(IaType::V4, &[]);
        assert_eq!(unfiltered.len(), 1);

        let filters: Vec<&Filter> = lan.filters.iter().collect();
        let candidates = lan.candidate_pools(IaType::V4, &filters);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].filter.as_deref(), Some("phones"));
        assert!(lan.find_pool(IaType::V4, "10.0.0.210".parse().unwrap()).is_some());
        assert_eq!(map.pools(IaType::V4).count(), 2);
    }
}
