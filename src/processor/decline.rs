use std::net::IpAddr;

use async_trait::async_trait;
use tracing::warn;

use super::{Exchange, MessageProcessor, check_server_and_client, status, status_ia};
use crate::binding::IaType;
use crate::v6::{Dhcp6Message, Dhcp6Option, MessageType, StatusCode};

/// Takes addresses the client found in use out of circulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineProcessor;

#[async_trait]
impl MessageProcessor<Dhcp6Message> for DeclineProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        check_server_and_client(exchange.request, &exchange.ctx.server_duid)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        if exchange.unicast_refused() {
            return Some(exchange.use_multicast_reply());
        }

        let request = exchange.request;
        let mut reply = Dhcp6Message::reply_to(request, MessageType::Reply, &exchange.ctx.server_duid);
        let client_id = exchange.client_id();
        let filters = exchange.filters();

        // Prefixes cannot be declined.
        for ia in request.ias().filter(|ia| ia.ia_type != IaType::Pd) {
            let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &[]);
            let manager = exchange.manager(ia.ia_type);
            let binding = match manager.find_current_binding(&binding_request).await {
                Ok(Some(binding)) => binding,
                Ok(None) => {
                    reply.options.push(Dhcp6Option::Ia(status_ia(
                        ia,
                        StatusCode::NoBinding,
                        "No binding for IA",
                    )));
                    continue;
                }
                Err(error) => {
                    warn!("Binding lookup failed: {}", error);
                    continue;
                }
            };

            for address in ia.addresses() {
                let address = IpAddr::V6(address.address);
                if binding.find_object(address).is_none() {
                    continue;
                }
                if let Err(error) = manager.decline_ia_address(&binding_request, address).await {
                    warn!("Decline of {} failed: {}", address, error);
                }
            }
        }

        reply.options.push(status(StatusCode::Success, "Decline processed"));
        Some(reply)
    }
}
