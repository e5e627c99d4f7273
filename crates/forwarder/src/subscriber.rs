//! The routing loop's message handler: one decoded global message in,
//! one fan-out through the forwarder service. Errors propagate so the
//! subscriber withholds the ack and the broker redelivers.

use std::sync::Arc;

use async_trait::async_trait;

use chatr_chat::Message;
use chatr_infra::{Delivery, MessageHandler};

use crate::service::ForwarderService;

pub struct ForwardHandler {
    service: Arc<dyn ForwarderService>,
}

impl ForwardHandler {
    pub fn new(service: Arc<dyn ForwarderService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for ForwardHandler {
    async fn handle(&self, delivery: Delivery) -> chatr_common::Result<()> {
        let message = Message::decode(&delivery.payload)?;
        self.service.forward_message(&message).await
    }
}
