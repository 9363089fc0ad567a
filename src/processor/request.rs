use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    Exchange, MessageProcessor, all_ia_addrs_on_link, check_server_and_client, exhausted_status,
    ia_hints, status_ia,
};
use crate::binding::LeaseState;
use crate::v6::{Dhcp6Message, Dhcp6Option, MessageType, StatusCode};

/// Commits advertised bindings.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestProcessor;

#[async_trait]
impl MessageProcessor<Dhcp6Message> for RequestProcessor {
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
        let mut bindings = Vec::new();

        for ia in request.ias() {
            let (on_link, checked) = all_ia_addrs_on_link(ia, &exchange.link);
            if !on_link {
                let mut checked = checked;
                checked.set_status(StatusCode::NotOnLink, "Addresses not on link");
                reply.options.push(Dhcp6Option::Ia(checked));
                continue;
            }

            let hints = ia_hints(ia);
            let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &hints);
            let manager = exchange.manager(ia.ia_type);

            let binding = match manager.find_current_binding(&binding_request).await {
                Ok(Some(binding)) => binding,
                Ok(None) => {
                    info!("Request for unknown {} iaid {}", ia.ia_type, ia.iaid);
                    reply.options.push(Dhcp6Option::Ia(status_ia(
                        ia,
                        StatusCode::NoBinding,
                        "No binding for IA",
                    )));
                    continue;
                }
                Err(error) => {
                    warn!("Binding lookup failed: {}", error);
                    reply.options.push(Dhcp6Option::Ia(status_ia(
                        ia,
                        exhausted_status(ia.ia_type),
                        "Unable to commit",
                    )));
                    continue;
                }
            };

            match manager
                .update_binding(&binding_request, binding, LeaseState::Leased)
                .await
            {
                Ok(binding) => {
                    reply.options.push(Dhcp6Option::Ia(exchange.reply_ia(&binding)));
                    bindings.push(binding);
                }
                Err(error) => {
                    warn!("{} iaid {} not committed: {}", ia.ia_type, ia.iaid, error);
                    reply.options.push(Dhcp6Option::Ia(status_ia(
                        ia,
                        exhausted_status(ia.ia_type),
                        "Unable to commit",
                    )));
                }
            }
        }

        for binding in &bindings {
            exchange.ddns(binding);
        }
        Some(exchange.finish(reply, bindings.first()))
    }
}
