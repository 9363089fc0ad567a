use std::net::IpAddr;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Exchange, MessageProcessor, check_server_and_client, status, status_ia};
use crate::binding::{Binding, IaType};
use crate::manager::BindingRequest;
use crate::v6::{Dhcp6Message, Dhcp6Option, Ia, MessageType, StatusCode};

/// Returns bindings the client no longer wants.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseProcessor;

/// Releases what the client listed in `ia`, or the whole binding when the
/// IA lists nothing.
async fn release_listed(
    exchange: &Exchange<'_, Dhcp6Message>,
    request: &BindingRequest<'_>,
    ia: &Ia,
    binding: &Binding,
) -> crate::error::Result<usize> {
    let manager = exchange.manager(ia.ia_type);
    if !ia.has_resources() {
        manager.release_binding(request, binding).await?;
        return Ok(binding.objects.len());
    }

    let mut released = 0;
    if ia.ia_type == IaType::Pd {
        for prefix in ia.prefixes() {
            let prefix = IpAddr::V6(prefix.prefix);
            if binding.find_object(prefix).is_some() && manager.release_ia_prefix(request, prefix).await? {
                released += 1;
            }
        }
    } else {
        for address in ia.addresses() {
            let address = IpAddr::V6(address.address);
            if binding.find_object(address).is_some()
                && manager.release_ia_address(request, address).await?
            {
                released += 1;
            }
        }
    }
    Ok(released)
}

#[async_trait]
impl MessageProcessor<Dhcp6Message> for ReleaseProcessor {
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

        for ia in request.ias() {
            let binding_request = exchange.binding_request(client_id, ia.iaid, &filters, &[]);
            let current = exchange
                .manager(ia.ia_type)
                .find_current_binding(&binding_request)
                .await;
            match current {
                Ok(Some(binding)) => {
                    match release_listed(exchange, &binding_request, ia, &binding).await {
                        Ok(released) => info!(
                            "Released {} objects of {} iaid {}",
                            released, ia.ia_type, ia.iaid
                        ),
                        Err(error) => warn!("Release of {} iaid {} failed: {}", ia.ia_type, ia.iaid, error),
                    }
                }
                Ok(None) => {
                    reply.options.push(Dhcp6Option::Ia(status_ia(
                        ia,
                        StatusCode::NoBinding,
                        "No binding for IA",
                    )));
                }
                Err(error) => warn!("Binding lookup failed: {}", error),
            }
        }

        reply.options.push(status(StatusCode::Success, "Release processed"));
        Some(reply)
    }
}
