use async_trait::async_trait;

use super::{Exchange, MessageProcessor};
use crate::v6::{Dhcp6Message, MessageType};

/// Configuration without addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct InfoRequestProcessor;

#[async_trait]
impl MessageProcessor<Dhcp6Message> for InfoRequestProcessor {
    fn discard_reason(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<String> {
        let request = exchange.request;
        if request.has_ias() {
            return Some("Information-request carries an IA".to_string());
        }
        match request.server_id() {
            Some(server_id) if server_id != exchange.ctx.server_duid => {
                Some("Server Identifier is not ours".to_string())
            }
            _ => None,
        }
    }

    async fn process(&self, exchange: &Exchange<'_, Dhcp6Message>) -> Option<Dhcp6Message> {
        let reply = Dhcp6Message::reply_to(exchange.request, MessageType::Reply, &exchange.ctx.server_duid);
        Some(exchange.finish(reply, None))
    }
}
