//! Policy resolution and client filters.
//!
//! A policy value is looked up in a chain of scopes, most specific first:
//! matching filters (later filters shadow earlier ones), the pool, the
//! link, the global table, and finally the built-in default of the
//! [`Policy`]. Values are stored as strings and parsed on read; a value
//! that does not parse is logged and the default is used.

use tracing::warn;

use crate::config::{FilterConfig, FilterExpression, MatchOperator, OptionSet, PolicyMap};
use crate::error::Result;

/// Read-only view of an inbound message used by filters.
pub trait ClientMessage {
    /// Payload of the first option with `code`.
    fn option_data(&self, code: u16) -> Option<Vec<u8>>;

    /// Vendor class (v4) or user and vendor class entries (v6).
    fn client_classes(&self) -> Vec<Vec<u8>>;
}

/// Policy keys understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Dedup window in milliseconds.
    RecentMessageTimer,
    V4PruneRecentOnComplete,
    V6PruneRecentOnComplete,
    SendRequestedOptionsOnly,
    V6SupportRapidCommit,
    V6VerifyUnknownRebind,
    V6ServerUnicast,
    V6IaNaT1,
    V6IaNaT2,
    V6IaPdT1,
    V6IaPdT2,
    V6PreferredLifetime,
    V6ValidLifetime,
    V4LeaseTime,
    V4T1,
    V4T2,
    /// Milliseconds an unanswered offer keeps its address.
    OfferExpiration,
    /// Seconds a declined address stays out of use.
    DeclineHold,
    /// Seconds between reaper passes.
    ReaperInterval,
    DeleteOnRelease,
    DdnsUpdate,
    DdnsDomain,
}

impl Policy {
    pub fn key(&self) -> &'static str {
        match self {
            Self::RecentMessageTimer => "dhcp.recent-message-timer",
            Self::V4PruneRecentOnComplete => "dhcp.v4.prune-recent-on-complete",
            Self::V6PruneRecentOnComplete => "dhcp.v6.prune-recent-on-complete",
            Self::SendRequestedOptionsOnly => "dhcp.send-requested-options-only",
            Self::V6SupportRapidCommit => "dhcp.v6.support-rapid-commit",
            Self::V6VerifyUnknownRebind => "dhcp.v6.verify-unknown-rebind",
            Self::V6ServerUnicast => "dhcp.v6.server-unicast",
            Self::V6IaNaT1 => "dhcp.v6.ia-na-t1",
            Self::V6IaNaT2 => "dhcp.v6.ia-na-t2",
            Self::V6IaPdT1 => "dhcp.v6.ia-pd-t1",
            Self::V6IaPdT2 => "dhcp.v6.ia-pd-t2",
            Self::V6PreferredLifetime => "dhcp.v6.preferred-lifetime",
            Self::V6ValidLifetime => "dhcp.v6.valid-lifetime",
            Self::V4LeaseTime => "dhcp.v4.lease-time",
            Self::V4T1 => "dhcp.v4.t1",
            Self::V4T2 => "dhcp.v4.t2",
            Self::OfferExpiration => "binding.offer-expiration",
            Self::DeclineHold => "binding.decline-hold",
            Self::ReaperInterval => "binding.reaper-interval",
            Self::DeleteOnRelease => "binding.delete-on-release",
            Self::DdnsUpdate => "ddns.update",
            Self::DdnsDomain => "ddns.domain",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Self::RecentMessageTimer => "5000",
            Self::V4PruneRecentOnComplete
            | Self::V6PruneRecentOnComplete
            | Self::SendRequestedOptionsOnly
            | Self::V6SupportRapidCommit
            | Self::V6VerifyUnknownRebind
            | Self::V6ServerUnicast
            | Self::DeleteOnRelease
            | Self::DdnsUpdate => "false",
            Self::V6IaNaT1 | Self::V6IaPdT1 | Self::V4T1 => "0.5",
            Self::V6IaNaT2 | Self::V6IaPdT2 => "0.8",
            Self::V4T2 => "0.875",
            Self::V6PreferredLifetime | Self::V6ValidLifetime | Self::V4LeaseTime => "3600",
            Self::OfferExpiration => "12000",
            Self::DeclineHold => "3600",
            Self::ReaperInterval => "60",
            Self::DdnsDomain => "",
        }
    }
}

/// A chain of policy tables, most specific first.
#[derive(Debug, Clone, Default)]
pub struct PolicyScope<'a> {
    layers: Vec<&'a PolicyMap>,
}

impl<'a> PolicyScope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a less specific table.
    pub fn then(mut self, layer: &'a PolicyMap) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn get_str(&self, policy: Policy) -> &str {
        self.layers
            .iter()
            .find_map(|layer| layer.get(policy.key()))
            .map(String::as_str)
            .unwrap_or_else(|| policy.default_value())
    }

    fn parsed<T: std::str::FromStr + Default>(&self, policy: Policy) -> T {
        let value = self.get_str(policy);
        match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    "Invalid value '{}' for policy {}, using default {}",
                    value,
                    policy.key(),
                    policy.default_value()
                );
                policy.default_value().parse().unwrap_or_default()
            }
        }
    }

    pub fn get_bool(&self, policy: Policy) -> bool {
        self.parsed(policy)
    }

    pub fn get_int(&self, policy: Policy) -> i32 {
        self.parsed(policy)
    }

    pub fn get_long(&self, policy: Policy) -> i64 {
        self.parsed(policy)
    }

    pub fn get_float(&self, policy: Policy) -> f64 {
        self.parsed(policy)
    }

    /// Seconds or milliseconds, clamped to `u32`.
    pub fn get_u32(&self, policy: Policy) -> u32 {
        self.get_long(policy).clamp(0, u32::MAX as i64) as u32
    }
}

/// A configured filter with its match data decoded.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    conditions: Vec<Condition>,
    pub policies: PolicyMap,
    pub options: OptionSet,
}

#[derive(Debug, Clone)]
enum Condition {
    Option {
        code: u16,
        operator: MatchOperator,
        data: Vec<u8>,
    },
    ClientClass(Vec<u8>),
}

impl Condition {
    fn matches(&self, message: &dyn ClientMessage) -> bool {
        match self {
            Self::Option {
                code,
                operator,
                data,
            } => {
                let Some(payload) = message.option_data(*code) else {
                    return false;
                };
                match operator {
                    MatchOperator::Exists => true,
                    MatchOperator::Equals => payload == *data,
                    MatchOperator::StartsWith => payload.starts_with(data),
                    MatchOperator::Contains => {
                        data.is_empty() || payload.windows(data.len()).any(|window| window == data)
                    }
                }
            }
            Self::ClientClass(class) => message
                .client_classes()
                .iter()
                .any(|candidate| candidate == class),
        }
    }
}

impl Filter {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut conditions = Vec::with_capacity(config.expressions.len());
        for expression in &config.expressions {
            let condition = match expression {
                FilterExpression::Option {
                    code,
                    operator,
                    hex,
                    text,
                } => {
                    let data = match (hex, text) {
                        (Some(hex), _) => hex::decode(hex)?,
                        (None, Some(text)) => text.as_bytes().to_vec(),
                        (None, None) => Vec::new(),
                    };
                    Condition::Option {
                        code: *code,
                        operator: *operator,
                        data,
                    }
                }
                FilterExpression::ClientClass { class } => {
                    Condition::ClientClass(class.as_bytes().to_vec())
                }
            };
            conditions.push(condition);
        }
        Ok(Self {
            name: config.name.clone(),
            conditions,
            policies: config.policies.clone(),
            options: config.options.clone(),
        })
    }

    /// True when every condition holds.
    pub fn matches(&self, message: &dyn ClientMessage) -> bool {
        !self.conditions.is_empty()
            && self
                .conditions
                .iter()
                .all(|condition| condition.matches(message))
    }
}

/// Filters of `filters` that match, in declaration order.
pub fn matching_filters<'a>(
    filters: &'a [Filter],
    message: &dyn ClientMessage,
) -> Vec<&'a Filter> {
    filters
        .iter()
        .filter(|filter| filter.matches(message))
        .collect()
}

/// Builds the effective option set: global, then link, then pool, then
/// each matching filter in order.
pub fn effective_options(
    global: &OptionSet,
    link: &OptionSet,
    pool: Option<&OptionSet>,
    filters: &[&Filter],
) -> OptionSet {
    let mut options = global.clone();
    options.merge(link);
    if let Some(pool) = pool {
        options.merge(pool);
    }
    for filter in filters {
        options.merge(&filter.options);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct TestMessage {
        options: Vec<(u16, Vec<u8>)>,
        classes: Vec<Vec<u8>>,
    }

    impl ClientMessage for TestMessage {
        fn option_data(&self, code: u16) -> Option<Vec<u8>> {
            self.options
                .iter()
                .find(|(candidate, _)| *candidate == code)
                .map(|(_, data)| data.clone())
        }

        fn client_classes(&self) -> Vec<Vec<u8>> {
            self.classes.clone()
        }
    }

    fn map(pairs: &[(&str, &str)]) -> PolicyMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn filter(name: &str, expressions: Vec<FilterExpression>) -> Filter {
        Filter::from_config(&FilterConfig {
            name: name.to_string(),
            expressions,
            policies: map(&[("dhcp.v6.ia-na-t1", name)]),
            options: OptionSet::default(),
            pools: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_scope_cascade() {
        let global = map(&[("dhcp.v6.ia-na-t1", "0.4"), ("dhcp.v6.support-rapid-commit", "true")]);
        let link = map(&[("dhcp.v6.ia-na-t1", "0.3")]);
        let pool = map(&[("dhcp.v6.ia-na-t1", "1000")]);

        let scope = PolicyScope::new().then(&pool).then(&link).then(&global);
        assert_eq!(scope.get_float(Policy::V6IaNaT1), 1000.0);
        assert!(scope.get_bool(Policy::V6SupportRapidCommit));
        assert_eq!(scope.get_float(Policy::V6IaNaT2), 0.8);

        let scope = PolicyScope::new().then(&link).then(&global);
        assert_eq!(scope.get_float(Policy::V6IaNaT1), 0.3);
    }

    #[test]
    fn test_invalid_value_falls_back_to_default() {
        let global = map(&[("binding.reaper-interval", "soon")]);
        let scope = PolicyScope::new().then(&global);
        assert_eq!(scope.get_long(Policy::ReaperInterval), 60);
        assert_eq!(scope.get_int(Policy::RecentMessageTimer), 5000);
        assert_eq!(scope.get_str(Policy::DdnsDomain), "");
    }

    #[test]
    fn test_every_default_parses() {
        let scope = PolicyScope::new();
        for policy in [Policy::V4T2, Policy::OfferExpiration, Policy::DeclineHold] {
            assert!(scope.get_str(policy).parse::<f64>().is_ok());
        }
        assert!(!scope.get_bool(Policy::V6PruneRecentOnComplete));
        assert_eq!(scope.get_u32(Policy::V6ValidLifetime), 3600);
    }

    #[test]
    fn test_filter_conditions_are_anded() {
        let message = TestMessage {
            options: vec![(60, b"MSFT 5.0".to_vec())],
            classes: vec![b"MSFT 5.0".to_vec()],
        };

        let both = filter(
            "both",
            vec![
                FilterExpression::Option {
                    code: 60,
                    operator: MatchOperator::StartsWith,
                    hex: None,
                    text: Some("MSFT".to_string()),
                },
                FilterExpression::ClientClass {
                    class: "MSFT 5.0".to_string(),
                },
            ],
        );
        assert!(both.matches(&message));

        let one_fails = filter(
            "one-fails",
            vec![
                FilterExpression::Option {
                    code: 60,
                    operator: MatchOperator::Exists,
                    hex: None,
                    text: None,
                },
                FilterExpression::Option {
                    code: 77,
                    operator: MatchOperator::Exists,
                    hex: None,
                    text: None,
                },
            ],
        );
        assert!(!one_fails.matches(&message));
    }

    #[test]
    fn test_last_matching_filter_wins() {
        let message = TestMessage {
            options: vec![(200, vec![0xde, 0xad, 0xbe, 0xef])],
            classes: vec![],
        };
        let filters = vec![
            filter(
                "0.1",
                vec![FilterExpression::Option {
                    code: 200,
                    operator: MatchOperator::Contains,
                    hex: Some("adbe".to_string()),
                    text: None,
                }],
            ),
            filter(
                "0.2",
                vec![FilterExpression::Option {
                    code: 200,
                    operator: MatchOperator::Equals,
                    hex: Some("deadbeef".to_string()),
                    text: None,
                }],
            ),
            filter(
                "0.3",
                vec![FilterExpression::Option {
                    code: 201,
                    operator: MatchOperator::Exists,
                    hex: None,
                    text: None,
                }],
            ),
        ];

        let matched = matching_filters(&filters, &message);
        assert_eq!(matched.len(), 2);

        let mut scope = PolicyScope::new();
        for filter in matched.iter().rev() {
            scope = scope.then(&filter.policies);
        }
        assert_eq!(scope.get_float(Policy::V6IaNaT1), 0.2);
    }

    #[test]
    fn test_effective_options_layering() {
        let global = OptionSet {
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            ..OptionSet::default()
        };
        let link = OptionSet {
            routers: vec![Ipv4Addr::new(10, 0, 0, 1)],
            ..OptionSet::default()
        };
        let mut printers = filter("printers", vec![FilterExpression::ClientClass { class: "p".to_string() }]);
        printers.options.dns_servers = vec![Ipv4Addr::new(10, 0, 0, 53)];

        let options = effective_options(&global, &link, None, &[&printers]);
        assert_eq!(options.dns_servers, vec![Ipv4Addr::new(10, 0, 0, 53)]);
        assert_eq!(options.routers, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }
}
