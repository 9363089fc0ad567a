use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    Exchange, MessageProcessor, check_client_only, exhausted_status, ia_hints, status, status_ia,
};
use crate::binding::{IaType, LeaseState};
use crate::policy::Policy;
use crate::v6::{Dhcp6Message, Dhcp6Option, MessageType, StatusCode};

/// Answers Solicit with Advertise, or with Reply under rapid commit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolicitProcessor;

#[async_trait]
impl MessageProcessor<Dhcp6Message> for SolicitProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        check_client_only(exchange.request)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        let request = exchange.request;
        let rapid_commit = request.has_rapid_commit()
            && exchange.scope().get_bool(Policy::V6SupportRapidCommit);
        let (reply_type, new_state) = if rapid_commit {
            (MessageType::Reply, LeaseState::Leased)
        } else {
            (MessageType::Advertise, LeaseState::Offered)
        };

        let mut reply = Dhcp6Message::reply_to(request, reply_type, &exchange.ctx.server_duid);
        if rapid_commit {
            reply.options.push(Dhcp6Option::RapidCommit);
        }

        let client_id = exchange.client_id();
        let filters = exchange.filters();
        let mut bindings = Vec::new();
        let mut failed = Vec::new();

        for ia in request.ias() {
            let hints = ia_hints(ia);
            let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &hints);
            let manager = exchange.manager(ia.ia_type);

            let result = match manager.find_current_binding(&binding_request).await {
                Ok(Some(binding)) => {
                    let target = if binding.state == LeaseState::Leased {
                        LeaseState::Leased
                    } else {
                        new_state
                    };
                    manager.update_binding(&binding_request, binding, target).await
                }
                Ok(None) => {
                    manager
                        .create_solicit_binding(&binding_request, rapid_commit)
                        .await
                }
                Err(error) => Err(error),
            };

            match result {
                Ok(binding) => {
                    reply.options.push(Dhcp6Option::Ia(exchange.reply_ia(&binding)));
                    bindings.push(binding);
                }
                Err(error) => {
                    warn!("{} iaid {} not bound: {}", ia.ia_type, ia.iaid, error);
                    failed.push(ia);
                }
            }
        }

        if bindings.is_empty() && !failed.is_empty() {
            // Nothing bound: address IAs are left out and the message says why.
            let wanted_addresses = failed.iter().any(|ia| ia.ia_type != IaType::Pd);
            let code = if wanted_addresses {
                StatusCode::NoAddrsAvail
            } else {
                StatusCode::NoPrefixAvail
            };
            reply.options.push(status(code, "No addresses or prefixes available"));
            for ia in failed.iter().filter(|ia| ia.ia_type == IaType::Pd) {
                reply.options.push(Dhcp6Option::Ia(status_ia(
                    ia,
                    StatusCode::NoPrefixAvail,
                    "No prefixes available",
                )));
            }
        } else {
            for ia in failed {
                reply.options.push(Dhcp6Option::Ia(status_ia(
                    ia,
                    exhausted_status(ia.ia_type),
                    "Nothing available for this IA",
                )));
            }
        }

        if rapid_commit {
            for binding in &bindings {
                exchange.ddns(binding);
            }
        }
        info!(
            "{} to {} with {} bindings",
            reply_type,
            exchange.inbound.remote,
            bindings.len()
        );
        Some(exchange.finish(reply, bindings.first()))
    }
}
