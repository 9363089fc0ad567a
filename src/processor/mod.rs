//! Per-message protocol handling.
//!
//! Every client message type has a processor implementing
//! [`MessageProcessor`]. The shared template runs three phases:
//! `pre_process` (link resolution, duplicate suppression with a window
//! scoped to the link, then the discard checks of the message type),
//! `process` (asks the binding managers for bindings and builds the reply)
//! and `post_process` (duplicate-set cleanup). A `None` reply means the message is silently dropped.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::binding::{Binding, BindingResource, IaType, INFINITE_LIFETIME};
use crate::config::{Config, OptionSet};
use crate::ddns::{DdnsUpdate, DdnsUpdater, FQDN_FLAG_S, FQDN_V4_FLAG_N, FQDN_V6_FLAG_N};
use crate::dedup::{DEFAULT_RECENT_MESSAGES, RecentMessages};
use crate::error::Result;
use crate::link::{Link, LinkMap};
use crate::manager::{BindingManager, BindingManagers, BindingRequest};
use crate::policy::{ClientMessage, Filter, Policy, PolicyScope, effective_options};
use crate::pool::Pool;
use crate::store::LeaseStore;
use crate::v4::Dhcp4Packet;
use crate::v6::message::is_always_sent;
use crate::v6::{Dhcp6Message, Dhcp6Option, Ia, IaAddress, IaPrefix, MessageType, StatusCode};

mod confirm;
mod decline;
mod info_request;
mod release;
mod renew;
mod request;
mod solicit;
mod v4;

pub use confirm::ConfirmProcessor;
pub use decline::DeclineProcessor;
pub use info_request::InfoRequestProcessor;
pub use release::ReleaseProcessor;
pub use renew::{RebindProcessor, RenewProcessor};
pub use request::RequestProcessor;
pub use solicit::SolicitProcessor;
pub use v4::{DeclineV4Processor, DiscoverProcessor, InformProcessor, ReleaseV4Processor, RequestV4Processor};

/// Process-wide state shared by every processor.
#[derive(Debug)]
pub struct ServerContext {
    pub config: Config,
    pub server_duid: Vec<u8>,
    pub links: LinkMap,
    pub managers: BindingManagers,
    pub recent_v4: RecentMessages,
    pub recent_v6: RecentMessages,
    pub ddns: Arc<dyn DdnsUpdater>,
}

impl ServerContext {
    pub fn new(
        config: Config,
        store: Arc<dyn LeaseStore>,
        ddns: Arc<dyn DdnsUpdater>,
    ) -> Result<Self> {
        let server_duid = config.server_duid()?.unwrap_or_default();
        let links = LinkMap::from_config(&config)?;
        let managers = BindingManagers::new(store, config.cache_size, &config.policies);

        Ok(Self {
            server_duid,
            links,
            managers,
            recent_v4: RecentMessages::new(DEFAULT_RECENT_MESSAGES),
            recent_v6: RecentMessages::new(DEFAULT_RECENT_MESSAGES),
            ddns,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        self.managers.store()
    }

    pub fn global_scope(&self) -> PolicyScope<'_> {
        PolicyScope::new().then(&self.config.policies)
    }

    /// Startup reconciliation of stored leases against the pools.
    pub async fn reconcile(&self) -> Result<()> {
        self.managers.reconcile(&self.links).await
    }

    pub async fn reap_expired(&self) -> Result<usize> {
        self.managers.reap_expired(&self.links).await
    }
}

/// Where a message came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Address the message arrived on, used for link resolution.
    pub local: IpAddr,
    pub remote: SocketAddr,
    /// Receiving interface, for link-local resolution.
    pub interface: Option<String>,
    /// Sent to one of our unicast addresses instead of the multicast group.
    pub unicast: bool,
}

/// The protocol family of a client message.
pub trait Family: ClientMessage + Send + Sync + Sized {
    type Reply: Send;

    /// Policy deciding whether `post_process` forgets the message.
    const PRUNE_POLICY: Policy;

    fn recent(ctx: &ServerContext) -> &RecentMessages;

    /// Address whose link serves the client.
    fn link_address(&self, ctx: &ServerContext, inbound: &Inbound) -> IpAddr;
}

impl Family for Dhcp6Message {
    type Reply = Dhcp6Message;
    const PRUNE_POLICY: Policy = Policy::V6PruneRecentOnComplete;

    fn recent(ctx: &ServerContext) -> &RecentMessages {
        &ctx.recent_v6
    }

    fn link_address(&self, _ctx: &ServerContext, inbound: &Inbound) -> IpAddr {
        inbound.local
    }
}

impl Family for Dhcp4Packet {
    type Reply = Dhcp4Packet;
    const PRUNE_POLICY: Policy = Policy::V4PruneRecentOnComplete;

    fn recent(ctx: &ServerContext) -> &RecentMessages {
        &ctx.recent_v4
    }

    fn link_address(&self, ctx: &ServerContext, inbound: &Inbound) -> IpAddr {
        if self.is_relayed() {
            return IpAddr::V4(self.giaddr);
        }
        ctx.config
            .server
            .v4_address
            .map(IpAddr::V4)
            .unwrap_or(inbound.local)
    }
}

/// One message being processed, after link resolution.
pub struct Exchange<'a, M> {
    pub ctx: &'a ServerContext,
    pub raw: &'a [u8],
    pub request: &'a M,
    pub inbound: &'a Inbound,
    pub link: Arc<Link>,
}

impl<M: Family> Exchange<'_, M> {
    /// Filters of the link matching the request.
    pub fn filters(&self) -> Vec<&Filter> {
        self.link.matching_filters(self.request)
    }

    /// Policies for this message: filters, link, then global.
    pub fn scope(&self) -> PolicyScope<'_> {
        self.link
            .scope(&self.ctx.config.policies, None, &self.filters())
    }

    pub fn pool_scope<'p>(&'p self, pool: Option<&'p Pool>) -> PolicyScope<'p> {
        self.link
            .scope(&self.ctx.config.policies, pool, &self.filters())
    }

    pub fn manager(&self, ia_type: IaType) -> &BindingManager {
        self.ctx.managers.get(ia_type)
    }

    pub fn binding_request<'b>(
        &'b self,
        client_id: &'b [u8],
        iaid: u32,
        filters: &'b [&'b Filter],
        hints: &'b [IpAddr],
    ) -> BindingRequest<'b> {
        BindingRequest {
            link: &self.link,
            client_id,
            iaid,
            filters,
            hints,
        }
    }

    /// Options for the client: global, link, the pool of the first bound
    /// object, then matching filters.
    pub fn options(&self, binding: Option<&Binding>) -> OptionSet {
        let pool = binding
            .and_then(|binding| {
                let object = binding.objects.first()?;
                self.link.find_pool(binding.ia_type, object.ip())
            })
            .map(|pool| &pool.options);
        effective_options(
            &self.ctx.config.options,
            &self.link.options,
            pool,
            &self.filters(),
        )
    }

    /// Hands committed bindings to the DDNS collaborator.
    pub fn dispatch_ddns(&self, binding: &Binding, fqdn: Option<(u8, String)>, no_update_flag: u8) {
        let scope = self.scope();
        if !scope.get_bool(Policy::DdnsUpdate) {
            return;
        }
        let Some((flags, name)) = fqdn else {
            return;
        };
        let (forward, reverse) = DdnsUpdate::directions(flags, no_update_flag);
        if !forward && !reverse {
            debug!("Client {} asked for no DNS updates", name);
            return;
        }
        let fqdn = DdnsUpdate::qualify(&name, scope.get_str(Policy::DdnsDomain));

        for object in &binding.objects {
            let BindingResource::Address(address) = object.resource else {
                continue;
            };
            let update = DdnsUpdate {
                link: self.link.name.clone(),
                address,
                fqdn: fqdn.clone(),
                client_id: binding.client_id.clone(),
                valid_lifetime: object.lifetimes().valid,
                forward,
                reverse,
            };
            let updater = self.ctx.ddns.clone();
            tokio::spawn(async move {
                let description = update.to_string();
                if let Err(error) = updater.update(update).await {
                    warn!("DDNS update {} failed: {}", description, error);
                }
            });
        }
    }
}

impl Exchange<'_, Dhcp6Message> {
    /// Reply IA for a binding, with lifetimes from its objects and T1/T2
    /// from policy.
    pub fn reply_ia(&self, binding: &Binding) -> Ia {
        let mut ia = Ia::empty(binding.ia_type, binding.iaid);
        for object in &binding.objects {
            let lifetimes = object.lifetimes();
            match object.resource {
                BindingResource::Address(IpAddr::V6(address)) => {
                    ia.options.push(Dhcp6Option::IaAddr(IaAddress {
                        address,
                        preferred_lifetime: lifetimes.preferred,
                        valid_lifetime: lifetimes.valid,
                        options: Vec::new(),
                    }));
                }
                BindingResource::Prefix { prefix, length } => {
                    ia.options.push(Dhcp6Option::IaPrefix(IaPrefix {
                        preferred_lifetime: lifetimes.preferred,
                        valid_lifetime: lifetimes.valid,
                        prefix_length: length,
                        prefix,
                        options: Vec::new(),
                    }));
                }
                BindingResource::Address(IpAddr::V4(_)) => {}
            }
        }

        let pool = binding
            .objects
            .first()
            .and_then(|object| self.link.find_pool(binding.ia_type, object.ip()));
        let scope = self.pool_scope(pool.map(|pool| pool.as_ref()));
        let min_preferred = binding.min_preferred_lifetime();
        let (t1, t2) = match binding.ia_type {
            IaType::Na => compute_t1_t2(
                min_preferred,
                scope.get_float(Policy::V6IaNaT1),
                scope.get_float(Policy::V6IaNaT2),
                DEFAULT_V6_T1,
                DEFAULT_V6_T2,
            ),
            IaType::Pd => compute_t1_t2(
                min_preferred,
                scope.get_float(Policy::V6IaPdT1),
                scope.get_float(Policy::V6IaPdT2),
                DEFAULT_V6_T1,
                DEFAULT_V6_T2,
            ),
            IaType::Ta | IaType::V4 => (0, 0),
        };
        ia.t1 = t1;
        ia.t2 = t2;
        ia
    }

    /// True when a unicast message arrived without the server-unicast
    /// policy; the caller must answer with UseMulticast only.
    pub fn unicast_refused(&self) -> bool {
        self.inbound.unicast && !self.scope().get_bool(Policy::V6ServerUnicast)
    }

    /// Reply carrying only a message-level UseMulticast status.
    pub fn use_multicast_reply(&self) -> Dhcp6Message {
        info!(
            "{} from {} was unicast without permission",
            self.request.message_type, self.inbound.remote
        );
        let mut reply = Dhcp6Message::reply_to(self.request, MessageType::Reply, &self.ctx.server_duid);
        reply.options.push(status(StatusCode::UseMulticast, "Use multicast"));
        reply
    }

    /// Appends the configured options and applies ORO filtering.
    pub fn finish(&self, mut reply: Dhcp6Message, binding: Option<&Binding>) -> Dhcp6Message {
        let options = self.options(binding);
        if !options.dns_servers_v6.is_empty() {
            reply.options.push(Dhcp6Option::DnsServers(options.dns_servers_v6));
        }
        if !options.domain_search.is_empty() {
            reply.options.push(Dhcp6Option::DomainList(options.domain_search));
        }
        if self.scope().get_bool(Policy::SendRequestedOptionsOnly) {
            let requested = self.request.requested_options();
            reply
                .options
                .retain(|option| is_always_sent(option.code()) || requested.contains(&option.code()));
        }
        reply
    }

    pub fn ddns(&self, binding: &Binding) {
        self.dispatch_ddns(binding, self.request.client_fqdn(), FQDN_V6_FLAG_N);
    }

    /// Client identifier; present once pre-processing has passed.
    pub fn client_id(&self) -> &[u8] {
        self.request.client_id().unwrap_or_default()
    }
}

impl Exchange<'_, Dhcp4Packet> {
    pub fn ddns(&self, binding: &Binding) {
        let fqdn = match self.request.client_fqdn() {
            Some((flags, name)) => Some((flags, String::from_utf8_lossy(name).into_owned())),
            None => self
                .request
                .hostname()
                .map(|name| (FQDN_FLAG_S, name.to_string())),
        };
        self.dispatch_ddns(binding, fqdn, FQDN_V4_FLAG_N);
    }
}

/// Default renew ratio for IA_NA and IA_PD.
pub const DEFAULT_V6_T1: f64 = 0.5;
/// Default rebind ratio for IA_NA and IA_PD.
pub const DEFAULT_V6_T2: f64 = 0.8;
pub const DEFAULT_V4_T1: f64 = 0.5;
pub const DEFAULT_V4_T2: f64 = 0.875;

fn timer(policy: f64, min_preferred: u32, default_ratio: f64) -> u32 {
    if policy > 1.0 {
        return policy.min(INFINITE_LIFETIME as f64) as u32;
    }
    if min_preferred == INFINITE_LIFETIME {
        return INFINITE_LIFETIME;
    }
    let ratio = if policy >= 0.0 { policy } else { default_ratio };
    (ratio * min_preferred as f64) as u32
}

/// T1 and T2 for an IA whose shortest preferred lifetime is
/// `min_preferred`. Policy values above 1 are absolute seconds; values in
/// `[0, 1]` are ratios; negative values select the default ratio. T2 is
/// never below T1.
pub fn compute_t1_t2(
    min_preferred: u32,
    t1_policy: f64,
    t2_policy: f64,
    default_t1: f64,
    default_t2: f64,
) -> (u32, u32) {
    let t1 = timer(t1_policy, min_preferred, default_t1);
    let mut t2 = timer(t2_policy, min_preferred, default_t2);
    if t2 < t1 {
        warn!("Computed T2 {} is below T1 {}, using T1", t2, t1);
        t2 = t1;
    }
    (t1, t2)
}

/// Checks every address and prefix of a client IA against `link`. Returns
/// whether all are on-link, and the IA with the lifetimes of the failing
/// ones set to zero. Nothing is removed from the IA.
pub fn all_ia_addrs_on_link(ia: &Ia, link: &Link) -> (bool, Ia) {
    let mut checked = ia.clone();
    let mut on_link = true;
    for option in &mut checked.options {
        match option {
            Dhcp6Option::IaAddr(address) => {
                if !link.is_on_link(IpAddr::V6(address.address)) {
                    debug!("{} is not on link {}", address.address, link.name);
                    address.preferred_lifetime = 0;
                    address.valid_lifetime = 0;
                    on_link = false;
                }
            }
            Dhcp6Option::IaPrefix(prefix) => {
                if !link.is_prefix_on_link(IpAddr::V6(prefix.prefix)) {
                    debug!("{}/{} is not valid on link {}", prefix.prefix, prefix.prefix_length, link.name);
                    prefix.preferred_lifetime = 0;
                    prefix.valid_lifetime = 0;
                    on_link = false;
                }
            }
            _ => {}
        }
    }
    (on_link, checked)
}

/// Addresses or prefixes the client placed in an IA.
pub fn ia_hints(ia: &Ia) -> Vec<IpAddr> {
    let addresses = ia.addresses().map(|address| address.address);
    let prefixes = ia.prefixes().map(|prefix| prefix.prefix);
    addresses
        .chain(prefixes)
        .filter(|ip| !ip.is_unspecified())
        .map(IpAddr::V6)
        .collect()
}

/// Zero-lifetime copies of client addresses the binding does not hold.
pub fn stale_entries(ia: &Ia, binding: &Binding) -> Vec<Dhcp6Option> {
    let mut stale = Vec::new();
    for address in ia.addresses() {
        if binding.find_object(IpAddr::V6(address.address)).is_none() {
            stale.push(Dhcp6Option::IaAddr(IaAddress {
                preferred_lifetime: 0,
                valid_lifetime: 0,
                options: Vec::new(),
                ..address.clone()
            }));
        }
    }
    for prefix in ia.prefixes() {
        if binding.find_object(IpAddr::V6(prefix.prefix)).is_none() {
            stale.push(Dhcp6Option::IaPrefix(IaPrefix {
                preferred_lifetime: 0,
                valid_lifetime: 0,
                options: Vec::new(),
                ..prefix.clone()
            }));
        }
    }
    stale
}

pub fn status(status: StatusCode, message: &str) -> Dhcp6Option {
    Dhcp6Option::StatusCode {
        status,
        message: message.to_string(),
    }
}

/// Status for an allocation failure of this IA kind.
pub fn exhausted_status(ia_type: IaType) -> StatusCode {
    match ia_type {
        IaType::Pd => StatusCode::NoPrefixAvail,
        IaType::Na | IaType::Ta | IaType::V4 => StatusCode::NoAddrsAvail,
    }
}

/// An empty IA carrying `code`.
pub fn status_ia(ia: &Ia, code: StatusCode, message: &str) -> Ia {
    let mut reply = Ia::empty(ia.ia_type, ia.iaid);
    reply.set_status(code, message);
    reply
}

/// Discard check shared by Request, Renew, Release and Decline.
pub fn check_server_and_client(request: &Dhcp6Message, server_duid: &[u8]) -> Option<String> {
    match request.server_id() {
        None => return Some("missing Server Identifier".to_string()),
        Some(server_id) if server_id != server_duid => {
            return Some("Server Identifier is not ours".to_string());
        }
        Some(_) => {}
    }
    if request.client_id().is_none() {
        return Some("missing Client Identifier".to_string());
    }
    None
}

/// Discard check shared by Solicit, Confirm and Rebind.
pub fn check_client_only(request: &Dhcp6Message) -> Option<String> {
    if request.client_id().is_none() {
        return Some("missing Client Identifier".to_string());
    }
    if request.server_id().is_some() {
        return Some("contains a Server Identifier".to_string());
    }
    None
}

#[async_trait]
pub trait MessageProcessor<M: Family>: Send + Sync {
    /// Reason to drop the message, from the RFC checks of its type.
    fn discard_reason(&self, exchange: &Exchange<'_, M>) -> Option<String>;

    /// Builds the reply, or `None` when no reply is sent.
    async fn process(&self, exchange: &Exchange<'_, M>) -> Option<M::Reply>;

    fn pre_process<'a>(
        &self,
        ctx: &'a ServerContext,
        raw: &'a [u8],
        request: &'a M,
        inbound: &'a Inbound,
    ) -> Option<Exchange<'a, M>> {
        let address = request.link_address(ctx, inbound);
        let link = match ctx.links.resolve(address, inbound.interface.as_deref()) {
            Ok(link) => link,
            Err(error) => {
                warn!("{} (message from {}), dropping", error, inbound.remote);
                return None;
            }
        };

        let exchange = Exchange {
            ctx,
            raw,
            request,
            inbound,
            link,
        };

        let window = exchange.scope().get_u32(Policy::RecentMessageTimer);
        if !M::recent(ctx).insert(raw, Duration::from_millis(window as u64)) {
            debug!("Dropping retransmission from {}", inbound.remote);
            return None;
        }

        if let Some(reason) = self.discard_reason(&exchange) {
            info!("Discarding message from {}: {}", inbound.remote, reason);
            return None;
        }
        Some(exchange)
    }

    fn post_process(&self, exchange: &Exchange<'_, M>) {
        if exchange.scope().get_bool(M::PRUNE_POLICY) {
            M::recent(exchange.ctx).remove(exchange.raw);
        }
    }

    /// Runs the three phases.
    async fn handle(
        &self,
        ctx: &ServerContext,
        raw: &[u8],
        request: &M,
        inbound: &Inbound,
    ) -> Option<M::Reply> {
        let exchange = self.pre_process(ctx, raw, request, inbound)?;
        let reply = self.process(&exchange).await;
        self.post_process(&exchange);
        reply
    }
}

/// Decodes a DHCPv6 message and runs the processor for its type.
pub async fn process_v6(ctx: &ServerContext, raw: &[u8], inbound: &Inbound) -> Option<Dhcp6Message> {
    let request = match Dhcp6Message::parse(raw) {
        Ok(request) => request,
        Err(error) => {
            debug!("Undecodable DHCPv6 message from {}: {}", inbound.remote, error);
            return None;
        }
    };
    debug!(
        "{} xid {:06x} from {}",
        request.message_type, request.transaction_id, inbound.remote
    );

    match request.message_type {
        MessageType::Solicit => SolicitProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Request => RequestProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Confirm => ConfirmProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Renew => RenewProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Rebind => RebindProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Release => ReleaseProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::Decline => DeclineProcessor.handle(ctx, raw, &request, inbound).await,
        MessageType::InformationRequest => {
            InfoRequestProcessor.handle(ctx, raw, &request, inbound).await
        }
        MessageType::RelayForw | MessageType::RelayRepl => {
            warn!("Relayed message from {} is not supported", inbound.remote);
            None
        }
        MessageType::Advertise | MessageType::Reply | MessageType::Reconfigure => {
            debug!("Ignoring server message {} from {}", request.message_type, inbound.remote);
            None
        }
    }
}

/// Decodes a DHCPv4 packet and runs the processor for its type.
pub async fn process_v4(ctx: &ServerContext, raw: &[u8], inbound: &Inbound) -> Option<Dhcp4Packet> {
    use crate::v4::MessageType as V4Type;
    use crate::v4::packet::BOOTREQUEST;

    let request = match Dhcp4Packet::parse(raw) {
        Ok(request) => request,
        Err(error) => {
            debug!("Undecodable DHCPv4 packet from {}: {}", inbound.remote, error);
            return None;
        }
    };
    if request.op != BOOTREQUEST {
        debug!("Ignoring BOOTREPLY from {}", inbound.remote);
        return None;
    }
    let Some(message_type) = request.message_type() else {
        info!("BOOTP from {} ({}) is not supported", request.format_mac(), inbound.remote);
        return None;
    };
    info!("{} from {} ({})", message_type, request.format_mac(), inbound.remote);

    match message_type {
        V4Type::Discover => DiscoverProcessor.handle(ctx, raw, &request, inbound).await,
        V4Type::Request => RequestV4Processor.handle(ctx, raw, &request, inbound).await,
        V4Type::Release => ReleaseV4Processor.handle(ctx, raw, &request, inbound).await,
        V4Type::Decline => DeclineV4Processor.handle(ctx, raw, &request, inbound).await,
        V4Type::Inform => InformProcessor.handle(ctx, raw, &request, inbound).await,
        V4Type::Offer | V4Type::Ack | V4Type::Nak => {
            warn!("Ignoring {} message", message_type);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkConfig, PolicyMap, PoolConfig, PoolSet};

    #[test]
    fn test_t1_t2_ratios() {
        assert_eq!(compute_t1_t2(3600, 0.5, 0.8, 0.5, 0.8), (1800, 2880));
        assert_eq!(compute_t1_t2(3600, -1.0, -1.0, 0.5, 0.8), (1800, 2880));
        assert_eq!(compute_t1_t2(3600, 0.0, 0.0, 0.5, 0.8), (0, 0));
    }

    #[test]
    fn test_t1_t2_absolute_values() {
        assert_eq!(compute_t1_t2(3600, 1000.0, 2000.0, 0.5, 0.8), (1000, 2000));
        assert_eq!(compute_t1_t2(INFINITE_LIFETIME, 1000.0, 0.8, 0.5, 0.8), (1000, INFINITE_LIFETIME));
    }

    #[test]
    fn test_t1_t2_infinite_preferred() {
        assert_eq!(
            compute_t1_t2(INFINITE_LIFETIME, 0.5, 0.8, 0.5, 0.8),
            (INFINITE_LIFETIME, INFINITE_LIFETIME)
        );
    }

    #[test]
    fn test_t2_never_below_t1() {
        assert_eq!(compute_t1_t2(3600, 0.9, 0.2, 0.5, 0.8), (3240, 3240));
        assert_eq!(compute_t1_t2(3600, 3000.0, 0.5, 0.5, 0.8), (3000, 3000));
    }

    fn lan() -> Link {
        Link::from_config(&LinkConfig {
            name: "lan".to_string(),
            subnet: "2001:db8:1::/64".parse().unwrap(),
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
        })
        .unwrap()
    }

    fn ia_with(addresses: &[&str]) -> Ia {
        let mut ia = Ia::empty(IaType::Na, 1);
        for address in addresses {
            ia.options.push(Dhcp6Option::IaAddr(IaAddress {
                address: address.parse().unwrap(),
                preferred_lifetime: 300,
                valid_lifetime: 600,
                options: Vec::new(),
            }));
        }
        ia
    }

    #[test]
    fn test_on_link_zeroes_without_removing() {
        let ia = ia_with(&["2001:db8:1::150", "2001:db8:9::1"]);
        let (on_link, checked) = all_ia_addrs_on_link(&ia, &lan());
        assert!(!on_link);
        let addresses: Vec<&IaAddress> = checked.addresses().collect();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].valid_lifetime, 600);
        assert_eq!(addresses[1].preferred_lifetime, 0);
        assert_eq!(addresses[1].valid_lifetime, 0);
        assert_eq!(ia.addresses().nth(1).unwrap().valid_lifetime, 600);
    }

    #[test]
    fn test_on_link_accepts_subnet_addresses() {
        let ia = ia_with(&["2001:db8:1::5"]);
        let (on_link, checked) = all_ia_addrs_on_link(&ia, &lan());
        assert!(on_link);
        assert_eq!(checked, ia);
    }

    #[test]
    fn test_hints_skip_unspecified() {
        let ia = ia_with(&["::", "2001:db8:1::150"]);
        assert_eq!(ia_hints(&ia), vec!["2001:db8:1::150".parse::<IpAddr>().unwrap()]);
    }
}
