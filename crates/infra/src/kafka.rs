use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rdkafka::{
    ClientConfig, Offset,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::{Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use chatr_config::KafkaConfig;

use crate::error::{Error, Result};

/// Per-message handler budget; a handler past this is abandoned and the
/// message redelivered.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(15);
/// Broker-side publish timeout.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

const MESSAGE_ID_HEADER: &str = "message_id";
const CORRELATION_ID_HEADER: &str = "correlation_id";

/// Shared producer/consumer settings: broker list plus the configured
/// broker version, used as the fallback when API-version probing is not
/// answered (older brokers).
fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("api.version.request", "true")
        .set("broker.version.fallback", &config.version);
    client_config
}

// ── Publisher ────────────────────────────────────────────────────────────────

/// Kafka producer. Messages are keyed so every topic partitions the same
/// way (by channel id for chat topics, by user id for match results),
/// which is what preserves per-channel ordering end to end.
pub struct Publisher {
    producer: FutureProducer,
}

impl Publisher {
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        let producer = base_client_config(config)
            .set("message.timeout.ms", "15000")
            .create()
            .map_err(|source| Error::Kafka {
                topic: "<producer>".into(),
                source,
            })?;
        Ok(Self { producer })
    }

    /// Publish one message. The envelope carries a fresh message UUID and
    /// the caller's correlation id in headers.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        correlation_id: &str,
    ) -> Result<()> {
        let message_id = Uuid::new_v4().to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: MESSAGE_ID_HEADER,
                value: Some(&message_id),
            })
            .insert(Header {
                key: CORRELATION_ID_HEADER,
                value: Some(correlation_id),
            });
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(source, _)| Error::Kafka {
                topic: topic.into(),
                source,
            })?;
        Ok(())
    }
}

// ── Subscriber ───────────────────────────────────────────────────────────────

/// One consumed message, decoupled from the broker's borrow lifetimes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> chatr_common::Result<()>;
}

/// Kafka consumer bound to a single topic.
///
/// With `auto_commit` the offset is committed on a 1 s interval regardless
/// of handler outcome (fan-in subscribers, where a lost message only costs
/// one presenter frame). Without it the offset is committed only after the
/// handler succeeds, and a failed handler seeks back so the message is
/// redelivered — the forwarder's ack-after-fan-out contract.
pub struct Subscriber {
    consumer: StreamConsumer,
    topic: String,
    auto_commit: bool,
}

impl Subscriber {
    pub fn connect(
        config: &KafkaConfig,
        group_id: &str,
        topic: &str,
        auto_commit: bool,
    ) -> Result<Self> {
        let consumer: StreamConsumer = base_client_config(config)
            .set("group.id", group_id)
            .set("enable.auto.commit", if auto_commit { "true" } else { "false" })
            .set("auto.commit.interval.ms", "1000")
            .set("auto.offset.reset", "latest")
            .set("fetch.message.max.bytes", "1048576")
            .create()
            .map_err(|source| Error::Kafka {
                topic: topic.into(),
                source,
            })?;
        consumer
            .subscribe(&[topic])
            .map_err(|source| Error::Kafka {
                topic: topic.into(),
                source,
            })?;
        info!(topic, group_id, auto_commit, "kafka subscriber ready");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            auto_commit,
        })
    }

    /// Consume until `shutdown` fires. Messages are handled sequentially,
    /// which is what preserves partition order; an in-flight handler is
    /// always drained before the loop exits.
    pub async fn run(
        self,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => message,
                    Err(source) => {
                        error!(topic = %self.topic, error = %source, "kafka receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    },
                },
            };

            let delivery = Delivery {
                topic: self.topic.clone(),
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: message.payload().unwrap_or_default().to_vec(),
                correlation_id: header_value(&message, CORRELATION_ID_HEADER),
            };
            let span = info_span!(
                "broker_message",
                topic = %self.topic,
                correlation_id = delivery.correlation_id.as_deref().unwrap_or(""),
            );

            let outcome =
                tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(delivery).instrument(span))
                    .await;
            match outcome {
                Ok(Ok(())) => {
                    if !self.auto_commit {
                        if let Err(source) =
                            self.consumer.commit_message(&message, CommitMode::Async)
                        {
                            warn!(topic = %self.topic, error = %source, "commit failed");
                        }
                    }
                },
                Ok(Err(e)) => {
                    warn!(topic = %self.topic, error = %e, "handler failed");
                    if !self.auto_commit {
                        self.seek_back(&message);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                Err(_) => {
                    warn!(topic = %self.topic, "handler timed out");
                    if !self.auto_commit {
                        self.seek_back(&message);
                    }
                },
            }
        }
        info!(topic = %self.topic, "kafka subscriber stopped");
        Ok(())
    }

    /// Rewind to the failed message so the next poll redelivers it.
    fn seek_back(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(source) = self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            Timeout::Never,
        ) {
            warn!(topic = %self.topic, error = %source, "seek failed; relying on rebalance redelivery");
        }
    }
}

fn header_value(message: &rdkafka::message::BorrowedMessage<'_>, name: &str) -> Option<String> {
    let headers = message.headers()?;
    headers.iter().find_map(|header| {
        (header.key == name)
            .then(|| header.value.map(|v| String::from_utf8_lossy(v).into_owned()))
            .flatten()
    })
}

/// Fresh correlation id for a publish that starts a new causal chain.
#[must_use]
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Keyed publish as the domain services see it; the Kafka implementation
/// stamps the envelope headers. Trait-shaped so services can run against
/// an in-memory broker in tests.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> chatr_common::Result<()>;
}

#[async_trait]
impl BrokerPublisher for Publisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> chatr_common::Result<()> {
        Publisher::publish(self, topic, key, payload, &new_correlation_id())
            .await
            .map_err(Into::into)
    }
}
