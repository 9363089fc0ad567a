//! DHCPv4 processors (RFC 2131 §4.3).

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DEFAULT_V4_T1, DEFAULT_V4_T2, Exchange, MessageProcessor, compute_t1_t2};
use crate::binding::{Binding, IaType, LeaseState};
use crate::config::Config;
use crate::error::Result;
use crate::manager::BindingRequest;
use crate::policy::Policy;
use crate::v4::{Dhcp4Option, Dhcp4Packet, MessageType};

/// Options every reply keeps regardless of the parameter request list:
/// message type, server identifier, lease time, T1 and T2.
const ALWAYS_SENT: [u8; 5] = [53, 54, 51, 58, 59];

/// Answers DHCPDISCOVER with DHCPOFFER.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoverProcessor;

/// Handles DHCPREQUEST in SELECTING, INIT-REBOOT, RENEWING and REBINDING.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestV4Processor;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseV4Processor;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineV4Processor;

/// Answers DHCPINFORM with configuration only.
#[derive(Debug, Default, Clone, Copy)]
pub struct InformProcessor;

fn server_ip(exchange: &Exchange<'_, Dhcp4Packet>) -> Ipv4Addr {
    exchange
        .ctx
        .config
        .server
        .v4_address
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}

fn binding_address(binding: &Binding) -> Option<Ipv4Addr> {
    binding.objects.iter().find_map(|object| match object.ip() {
        IpAddr::V4(address) => Some(address),
        IpAddr::V6(_) => None,
    })
}

fn holds(binding: &Binding, address: Ipv4Addr) -> bool {
    binding.find_object(IpAddr::V4(address)).is_some()
}

/// Subnet mask, router, DNS and domain for the client.
fn common_options(exchange: &Exchange<'_, Dhcp4Packet>, binding: Option<&Binding>) -> Vec<Dhcp4Option> {
    let configured = exchange.options(binding);
    let mut options = Vec::new();
    if let Some(mask) = Config::subnet_mask(&exchange.link.subnet) {
        options.push(Dhcp4Option::SubnetMask(mask));
    }
    if !configured.routers.is_empty() {
        options.push(Dhcp4Option::Router(configured.routers));
    }
    if !configured.dns_servers.is_empty() {
        options.push(Dhcp4Option::DnsServer(configured.dns_servers));
    }
    if let Some(domain) = configured.domain_name {
        options.push(Dhcp4Option::DomainName(domain));
    }
    if let Some(mtu) = configured.mtu {
        options.push(Dhcp4Option::InterfaceMtu(mtu));
    }
    options
}

/// Options for an OFFER or ACK carrying `binding`.
fn lease_options(exchange: &Exchange<'_, Dhcp4Packet>, binding: &Binding) -> Vec<Dhcp4Option> {
    let lease_time = binding
        .objects
        .first()
        .map(|object| object.lifetimes().valid)
        .unwrap_or_default();
    let pool = binding
        .objects
        .first()
        .and_then(|object| exchange.link.find_pool(IaType::V4, object.ip()));
    let scope = exchange.pool_scope(pool.map(|pool| pool.as_ref()));
    let (t1, t2) = compute_t1_t2(
        lease_time,
        scope.get_float(Policy::V4T1),
        scope.get_float(Policy::V4T2),
        DEFAULT_V4_T1,
        DEFAULT_V4_T2,
    );

    let mut options = vec![
        Dhcp4Option::ServerIdentifier(server_ip(exchange)),
        Dhcp4Option::LeaseTime(lease_time),
        Dhcp4Option::RenewalTime(t1),
        Dhcp4Option::RebindingTime(t2),
    ];
    options.extend(common_options(exchange, Some(binding)));
    if let Some(IpAddr::V4(broadcast)) = Config::broadcast(&exchange.link.subnet) {
        options.push(Dhcp4Option::BroadcastAddress(broadcast));
    }
    options
}

/// Applies the parameter request list and echoes relay agent information.
fn finish_options(exchange: &Exchange<'_, Dhcp4Packet>, options: Vec<Dhcp4Option>) -> Vec<Dhcp4Option> {
    let mut options = match exchange.request.parameter_request_list() {
        Some(prl) if exchange.scope().get_bool(Policy::SendRequestedOptionsOnly) => options
            .into_iter()
            .filter(|option| {
                let code = option.code();
                ALWAYS_SENT.contains(&code) || prl.contains(&code)
            })
            .collect(),
        _ => options,
    };
    if let Some(relay_info) = exchange.request.relay_agent_info() {
        options.push(Dhcp4Option::RelayAgentInfo(relay_info.to_vec()));
    }
    options
}

fn reply(
    exchange: &Exchange<'_, Dhcp4Packet>,
    message_type: MessageType,
    your_ip: Ipv4Addr,
    options: Vec<Dhcp4Option>,
) -> Dhcp4Packet {
    let options = finish_options(exchange, options);
    let mut reply = Dhcp4Packet::create_reply(
        exchange.request,
        message_type,
        your_ip,
        server_ip(exchange),
        options,
    );
    // Replies go back to ciaddr when the client has one.
    reply.ciaddr = exchange.request.ciaddr;
    reply
}

fn nak(exchange: &Exchange<'_, Dhcp4Packet>, reason: &str) -> Dhcp4Packet {
    warn!("NAK to {}: {}", exchange.request.format_mac(), reason);
    let mut options = vec![Dhcp4Option::ServerIdentifier(server_ip(exchange))];
    if let Some(relay_info) = exchange.request.relay_agent_info() {
        options.push(Dhcp4Option::RelayAgentInfo(relay_info.to_vec()));
    }
    Dhcp4Packet::create_reply(
        exchange.request,
        MessageType::Nak,
        Ipv4Addr::UNSPECIFIED,
        server_ip(exchange),
        options,
    )
}

fn ack(exchange: &Exchange<'_, Dhcp4Packet>, binding: &Binding) -> Option<Dhcp4Packet> {
    let address = binding_address(binding)?;
    exchange.ddns(binding);
    info!(
        "ACK {} to {} ({}s)",
        address,
        exchange.request.format_mac(),
        binding.objects.first().map(|object| object.lifetimes().valid).unwrap_or_default()
    );
    Some(reply(exchange, MessageType::Ack, address, lease_options(exchange, binding)))
}

fn server_id_mismatch(exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
    match exchange.request.server_identifier() {
        Some(server_id) if server_id != server_ip(exchange) => {
            Some(format!("addressed to server {}", server_id))
        }
        _ => None,
    }
}

async fn current_binding(
    exchange: &Exchange<'_, Dhcp4Packet>,
    request: &BindingRequest<'_>,
) -> Option<Binding> {
    match exchange.manager(IaType::V4).find_current_binding(request).await {
        Ok(binding) => binding,
        Err(error) => {
            warn!("Binding lookup failed: {}", error);
            None
        }
    }
}

async fn commit(
    exchange: &Exchange<'_, Dhcp4Packet>,
    request: &BindingRequest<'_>,
    binding: Binding,
) -> Result<Binding> {
    exchange
        .manager(IaType::V4)
        .update_binding(request, binding, LeaseState::Leased)
        .await
}

#[async_trait]
impl MessageProcessor<Dhcp4Packet> for DiscoverProcessor {
    fn discard_reason(&self, _exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
        None
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<Dhcp4Packet> {
        let client_id = exchange.request.client_id();
        let filters = exchange.filters();
        let hints: Vec<IpAddr> = exchange.request.requested_ip().map(IpAddr::V4).into_iter().collect();
        let request = exchange.binding_request(&client_id, 0, &filters, &hints);
        let manager = exchange.manager(IaType::V4);

        let result = match current_binding(exchange, &request).await {
            Some(binding) => {
                let target = if binding.state == LeaseState::Leased {
                    LeaseState::Leased
                } else {
                    LeaseState::Offered
                };
                manager.update_binding(&request, binding, target).await
            }
            None => manager.create_solicit_binding(&request, false).await,
        };
        let binding = match result {
            Ok(binding) => binding,
            Err(error) => {
                warn!("No offer for {}: {}", exchange.request.format_mac(), error);
                return None;
            }
        };

        let address = binding_address(&binding)?;
        info!("OFFER {} to {}", address, exchange.request.format_mac());
        Some(reply(exchange, MessageType::Offer, address, lease_options(exchange, &binding)))
    }
}

#[async_trait]
impl MessageProcessor<Dhcp4Packet> for RequestV4Processor {
    fn discard_reason(&self, _exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
        None
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<Dhcp4Packet> {
        let packet = exchange.request;
        let client_id = packet.client_id();
        let filters = exchange.filters();
        let request = exchange.binding_request(&client_id, 0, &filters, &[]);
        let mac = packet.format_mac();

        // SELECTING
        if let Some(server_id) = packet.server_identifier() {
            let binding = current_binding(exchange, &request).await;
            if server_id != server_ip(exchange) {
                if let Some(binding) = binding
                    && binding.state == LeaseState::Offered
                {
                    info!("{} chose server {}, withdrawing our offer", mac, server_id);
                    if let Err(error) = exchange.manager(IaType::V4).release_binding(&request, &binding).await {
                        warn!("Withdrawing offer failed: {}", error);
                    }
                }
                return None;
            }
            let Some(requested) = packet.requested_ip() else {
                return Some(nak(exchange, "No requested address"));
            };
            return match binding {
                Some(binding) if holds(&binding, requested) => match commit(exchange, &request, binding).await {
                    Ok(binding) => ack(exchange, &binding),
                    Err(error) => Some(nak(exchange, &error.to_string())),
                },
                _ => Some(nak(exchange, "Requested address was not offered")),
            };
        }

        // INIT-REBOOT
        if packet.ciaddr.is_unspecified() {
            let Some(requested) = packet.requested_ip() else {
                debug!("REQUEST from {} without an address", mac);
                return None;
            };
            if !exchange.link.is_on_link(IpAddr::V4(requested)) {
                return Some(nak(exchange, "Requested address is on the wrong network"));
            }
            let Some(binding) = current_binding(exchange, &request).await else {
                debug!("INIT-REBOOT from unknown client {}", mac);
                return None;
            };
            if !holds(&binding, requested) {
                return Some(nak(exchange, "Requested address is not bound to the client"));
            }
            return match commit(exchange, &request, binding).await {
                Ok(binding) => ack(exchange, &binding),
                Err(error) => Some(nak(exchange, &error.to_string())),
            };
        }

        // RENEWING / REBINDING
        match current_binding(exchange, &request).await {
            Some(binding) if holds(&binding, packet.ciaddr) => match commit(exchange, &request, binding).await {
                Ok(binding) => ack(exchange, &binding),
                Err(error) => Some(nak(exchange, &error.to_string())),
            },
            _ => Some(nak(exchange, "No binding for ciaddr")),
        }
    }
}

#[async_trait]
impl MessageProcessor<Dhcp4Packet> for ReleaseV4Processor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
        if exchange.request.ciaddr.is_unspecified() {
            return Some("RELEASE without ciaddr".to_string());
        }
        server_id_mismatch(exchange)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<Dhcp4Packet> {
        let packet = exchange.request;
        let client_id = packet.client_id();
        let filters = exchange.filters();
        let request = exchange.binding_request(&client_id, 0, &filters, &[]);

        match exchange
            .manager(IaType::V4)
            .release_ia_address(&request, IpAddr::V4(packet.ciaddr))
            .await
        {
            Ok(true) => info!("RELEASE from {} for {}", packet.format_mac(), packet.ciaddr),
            Ok(false) => info!(
                "RELEASE from {} for {} ignored, not bound to the client",
                packet.format_mac(),
                packet.ciaddr
            ),
            Err(error) => warn!("RELEASE of {} failed: {}", packet.ciaddr, error),
        }
        None
    }
}

#[async_trait]
impl MessageProcessor<Dhcp4Packet> for DeclineV4Processor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
        if exchange.request.requested_ip().is_none() {
            return Some("DECLINE without a requested address".to_string());
        }
        server_id_mismatch(exchange)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<Dhcp4Packet> {
        let packet = exchange.request;
        let declined = packet.requested_ip()?;
        let client_id = packet.client_id();
        let filters = exchange.filters();
        let request = exchange.binding_request(&client_id, 0, &filters, &[]);

        match exchange
            .manager(IaType::V4)
            .decline_ia_address(&request, IpAddr::V4(declined))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                "DECLINE from {} for {} rejected, not bound to the client",
                packet.format_mac(),
                declined
            ),
            Err(error) => warn!("DECLINE of {} failed: {}", declined, error),
        }
        None
    }
}

#[async_trait]
impl MessageProcessor<Dhcp4Packet> for InformProcessor {
    fn discard_reason(&self, _exchange: &Exchange<'_, Dhcp4Packet>) -> Option<String> {
        None
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp4Packet>) -> Option<Dhcp4Packet> {
        let mut options = vec![Dhcp4Option::ServerIdentifier(server_ip(exchange))];
        options.extend(common_options(exchange, None));
        info!("INFORM response to {}", exchange.request.format_mac());
        Some(reply(exchange, MessageType::Ack, exchange.request.ciaddr, options))
    }
}
