use async_trait::async_trait;
use tracing::info;

use super::{Exchange, MessageProcessor, all_ia_addrs_on_link, check_client_only, status};
use crate::binding::IaType;
use crate::v6::{Dhcp6Message, Dhcp6Option, MessageType, StatusCode};

/// Tells a client that moved whether its addresses still fit the link.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfirmProcessor;

#[async_trait]
impl MessageProcessor<Dhcp6Message> for ConfirmProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        if exchange.unicast_refused() {
            return Some("Confirm must be multicast".to_string());
        }
        check_client_only(exchange.request)
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        let request = exchange.request;
        let ias: Vec<_> = request
            .ias()
            .filter(|ia| ia.ia_type != IaType::Pd && ia.addresses().next().is_some())
            .collect();
        if ias.is_empty() {
            info!("Confirm from {} has no addresses", exchange.inbound.remote);
            return None;
        }

        let mut reply = Dhcp6Message::reply_to(request, MessageType::Reply, &exchange.ctx.server_duid);
        let mut all_on_link = true;
        for ia in ias {
            let (on_link, mut checked) = all_ia_addrs_on_link(ia, &exchange.link);
            if on_link {
                checked.set_status(StatusCode::Success, "Addresses on link");
            } else {
                checked.set_status(StatusCode::NotOnLink, "Addresses not on link");
                all_on_link = false;
            }
            reply.options.push(Dhcp6Option::Ia(checked));
        }

        if all_on_link {
            reply.options.push(status(StatusCode::Success, "All addresses on link"));
        } else {
            reply.options.push(status(StatusCode::NotOnLink, "Some addresses not on link"));
        }
        Some(exchange.finish(reply, None))
    }
}
