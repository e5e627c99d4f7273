//! The fan-out sink: consume this instance's private topic and deliver
//! each message to the local sessions of its channel.

use std::sync::Arc;

use async_trait::async_trait;

use chatr_infra::{Delivery, MessageHandler};

use crate::{domain::Message, ws::SessionRegistry};

/// Handler for `rc.msg.<subscriber-id>`. No filtering beyond the channel
/// id: the forwarder only sends what some local session cares about.
pub struct BroadcastHandler {
    registry: Arc<SessionRegistry>,
}

impl BroadcastHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageHandler for BroadcastHandler {
    async fn handle(&self, delivery: Delivery) -> chatr_common::Result<()> {
        let message = Message::decode(&delivery.payload)?;
        let frame = serde_json::to_string(&message.to_presenter())
            .map_err(|e| chatr_common::Error::message(format!("encode presenter: {e}")))?;
        self.registry
            .broadcast_to_channel(message.channel_id, &frame)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::Event;

    fn delivery(message: &Message) -> Delivery {
        Delivery {
            topic: "rc.msg.test".into(),
            key: Some(message.channel_id.to_string()),
            payload: message.encode().expect("encode"),
            correlation_id: None,
        }
    }

    async fn register(
        registry: &SessionRegistry,
        conn_id: &str,
        channel_id: u64,
        user_id: u64,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .register(crate::ws::test_session(conn_id, channel_id, user_id, tx))
            .await;
        rx
    }

    #[tokio::test]
    async fn delivers_presenter_frames_to_matching_sessions_only() {
        let registry = Arc::new(SessionRegistry::new());
        let mut rx_match = register(&registry, "a", 9, 100).await;
        let mut rx_other = register(&registry, "b", 10, 200).await;

        let message = Message {
            message_id: 77,
            event: Event::Text,
            channel_id: 9,
            user_id: 100,
            payload: "hi".into(),
            seen: false,
            time: 1,
        };
        BroadcastHandler::new(Arc::clone(&registry))
            .handle(delivery(&message))
            .await
            .expect("handle");

        let frame = rx_match.try_recv().expect("delivered");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
        // Presenter form: string ids, numeric event.
        assert_eq!(value["messageId"], "77");
        assert_eq!(value["event"], 0);
        assert_eq!(value["payload"], "hi");
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_tolerated() {
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = register(&registry, "a", 9, 100).await;

        let message = Message {
            message_id: 77,
            event: Event::Text,
            channel_id: 9,
            user_id: 100,
            payload: "hi".into(),
            seen: false,
            time: 1,
        };
        let handler = BroadcastHandler::new(Arc::clone(&registry));
        handler.handle(delivery(&message)).await.expect("handle");
        handler.handle(delivery(&message)).await.expect("handle");

        // Both frames arrive carrying the same message id, so clients can
        // dedupe by id.
        let first = rx.try_recv().expect("first");
        let second = rx.try_recv().expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn garbage_payload_is_an_error() {
        let registry = Arc::new(SessionRegistry::new());
        let handler = BroadcastHandler::new(registry);
        let result = handler
            .handle(Delivery {
                topic: "rc.msg.test".into(),
                key: None,
                payload: b"{not json".to_vec(),
                correlation_id: None,
            })
            .await;
        assert!(result.is_err());
    }
}
