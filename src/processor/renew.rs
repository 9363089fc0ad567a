use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    Exchange, MessageProcessor, all_ia_addrs_on_link, check_client_only, check_server_and_client,
    exhausted_status, stale_entries, status_ia,
};
use crate::binding::{Binding, LeaseState};
use crate::policy::Policy;
use crate::v6::{Dhcp6Message, Dhcp6Option, Ia, MessageType, StatusCode};

/// Extends bindings for a client talking to the server that granted them.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenewProcessor;

/// Extends bindings for a client that lost contact with its server.
#[derive(Debug, Default, Clone, Copy)]
pub struct RebindProcessor;

enum Outcome {
    Ia(Ia),
    Skip,
}

/// Refreshes the binding for one IA, or explains why it could not.
async fn extend(
    exchange: &Exchange<'_, Dhcp6Message>,
    ia: &Ia,
    binding: Binding,
    bindings: &mut Vec<Binding>,
) -> Ia {
    let (on_link, checked) = all_ia_addrs_on_link(ia, &exchange.link);
    if !on_link {
        info!("{} iaid {} has addresses off link", ia.ia_type, ia.iaid);
        return checked;
    }

    let client_id = exchange.client_id();
    let filters = exchange.filters();
    let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &[]);
    match exchange
        .manager(ia.ia_type)
        .update_binding(&binding_request, binding, LeaseState::Leased)
        .await
    {
        Ok(binding) => {
            let mut reply_ia = exchange.reply_ia(&binding);
            reply_ia.options.extend(stale_entries(ia, &binding));
            bindings.push(binding);
            reply_ia
        }
        Err(error) => {
            warn!("{} iaid {} not extended: {}", ia.ia_type, ia.iaid, error);
            status_ia(ia, exhausted_status(ia.ia_type), "Unable to extend")
        }
    }
}

async fn renew_or_rebind(exchange: &Exchange<'_, Dhcp6Message>, rebind: bool) -> Option<Dhcp6Message> {
    let request = exchange.request;
    let mut reply = Dhcp6Message::reply_to(request, MessageType::Reply, &exchange.ctx.server_duid);
    let verify_unknown = exchange.scope().get_bool(Policy::V6VerifyUnknownRebind);
    let client_id = exchange.client_id();
    let filters = exchange.filters();
    let mut bindings = Vec::new();

    for ia in request.ias() {
        let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &[]);
        let current = exchange
            .manager(ia.ia_type)
            .find_current_binding(&binding_request)
            .await;

        let outcome = match current {
            Ok(Some(binding)) => Outcome::Ia(extend(exchange, ia, binding, &mut bindings).await),
            Ok(None) if !rebind => Outcome::Ia(status_ia(ia, StatusCode::NoBinding, "No binding for IA")),
            Ok(None) if verify_unknown => {
                let (on_link, checked) = all_ia_addrs_on_link(ia, &exchange.link);
                if on_link {
                    debug!("Unknown rebind {} iaid {} is on link", ia.ia_type, ia.iaid);
                    Outcome::Skip
                } else {
                    Outcome::Ia(checked)
                }
            }
            Ok(None) => {
                debug!("Ignoring unknown rebind {} iaid {}", ia.ia_type, ia.iaid);
                Outcome::Skip
            }
            Err(error) => {
                warn!("Binding lookup failed: {}", error);
                Outcome::Ia(status_ia(ia, exhausted_status(ia.ia_type), "Unable to extend"))
            }
        };
        if let Outcome::Ia(reply_ia) = outcome {
            reply.options.push(Dhcp6Option::Ia(reply_ia));
        }
    }

    if rebind && !reply.has_ias() {
        info!("No IA to answer in Rebind from {}", exchange.inbound.remote);
        return None;
    }
    Some(exchange.finish(reply, bindings.first()))
}

#[async_trait]
impl MessageProcessor<Dhcp6Message> for RenewProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        check_server_and_client(exchange.request, &exchange.ctx.server_duid)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        if exchange.unicast_refused() {
            return Some(exchange.use_multicast_reply());
        }
        renew_or_rebind(exchange, false).await
    }
}

#[async_trait]
impl MessageProcessor<Dhcp6Message> for RebindProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        if exchange.unicast_refused() {
            return Some("Rebind must be multicast".to_string());
        }
        check_client_only(exchange.request)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        renew_or_rebind(exchange, true).await
    }
}
