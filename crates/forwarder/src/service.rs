use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use chatr_chat::Message;
use chatr_common::Result;
use chatr_infra::BrokerPublisher;

use crate::repo::SubscriberRepo;

#[async_trait]
pub trait ForwarderService: Send + Sync {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()>;
    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()>;
    /// Republish one global message to every subscriber topic of its
    /// channel. Fails (and must not be acked) unless every republish
    /// succeeded; consumers tolerate the resulting duplicates.
    async fn forward_message(&self, message: &Message) -> Result<()>;
}

pub struct LiveForwarderService {
    repo: Arc<dyn SubscriberRepo>,
    broker: Arc<dyn BrokerPublisher>,
}

impl LiveForwarderService {
    pub fn new(repo: Arc<dyn SubscriberRepo>, broker: Arc<dyn BrokerPublisher>) -> Self {
        Self { repo, broker }
    }
}

#[async_trait]
impl ForwarderService for LiveForwarderService {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()> {
        self.repo
            .register_channel_session(channel_id, user_id, subscriber)
            .await
    }

    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.repo.remove_channel_session(channel_id, user_id).await
    }

    async fn forward_message(&self, message: &Message) -> Result<()> {
        let subscribers = self.repo.subscribers(message.channel_id).await?;
        if subscribers.is_empty() {
            debug!(
                channel_id = message.channel_id,
                "no subscribers, dropping message"
            );
            return Ok(());
        }

        let key = message.channel_id.to_string();
        let payload = message.encode()?;
        // Fan-out is bounded by the number of chat instances holding this
        // channel (1-2 for two-party channels); publish to all in parallel
        // and ack only when every one succeeded.
        futures::future::try_join_all(
            subscribers
                .iter()
                .map(|topic| self.broker.publish(topic, &key, &payload)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use chatr_chat::domain::Event;
    use chatr_common::Error;

    use super::*;

    struct FakeRepo {
        entries: Mutex<Vec<(u64, u64, String)>>,
    }

    impl FakeRepo {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }

        fn with_sessions(sessions: &[(u64, u64, &str)]) -> Self {
            Self {
                entries: Mutex::new(
                    sessions
                        .iter()
                        .map(|(c, u, s)| (*c, *u, (*s).to_string()))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl SubscriberRepo for FakeRepo {
        async fn register_channel_session(
            &self,
            channel_id: u64,
            user_id: u64,
            subscriber: &str,
        ) -> Result<()> {
            let mut entries = self.entries.lock().expect("lock");
            entries.retain(|(c, u, _)| (*c, *u) != (channel_id, user_id));
            entries.push((channel_id, user_id, subscriber.to_string()));
            Ok(())
        }

        async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()> {
            self.entries
                .lock()
                .expect("lock")
                .retain(|(c, u, _)| (*c, *u) != (channel_id, user_id));
            Ok(())
        }

        async fn subscribers(&self, channel_id: u64) -> Result<HashSet<String>> {
            Ok(self
                .entries
                .lock()
                .expect("lock")
                .iter()
                .filter(|(c, _, _)| *c == channel_id)
                .map(|(_, _, s)| s.clone())
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeBroker {
        published: Mutex<Vec<(String, String)>>,
        failing_topic: Option<String>,
    }

    #[async_trait]
    impl BrokerPublisher for FakeBroker {
        async fn publish(&self, topic: &str, key: &str, _payload: &[u8]) -> Result<()> {
            if self.failing_topic.as_deref() == Some(topic) {
                return Err(Error::message(format!("publish to {topic} failed")));
            }
            self.published
                .lock()
                .expect("lock")
                .push((topic.to_string(), key.to_string()));
            Ok(())
        }
    }

    fn message(channel_id: u64) -> Message {
        Message {
            message_id: 1,
            event: Event::Text,
            channel_id,
            user_id: 100,
            payload: "hi".into(),
            seen: false,
            time: 0,
        }
    }

    #[tokio::test]
    async fn forwards_once_per_distinct_instance() {
        // Users 100 and 300 share instance X; one republish covers both.
        let repo = Arc::new(FakeRepo::with_sessions(&[
            (9, 100, "rc.msg.x"),
            (9, 300, "rc.msg.x"),
            (9, 200, "rc.msg.y"),
        ]));
        let broker = Arc::new(FakeBroker::default());
        let service = LiveForwarderService::new(repo, broker.clone());

        service.forward_message(&message(9)).await.expect("forward");

        let published = broker.published.lock().expect("lock");
        let topics: HashSet<&str> = published.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(published.len(), 2);
        assert_eq!(topics, HashSet::from(["rc.msg.x", "rc.msg.y"]));
        // Republishes keep the channel partition key.
        assert!(published.iter().all(|(_, key)| key == "9"));
    }

    #[tokio::test]
    async fn other_channels_subscribers_are_untouched() {
        let repo = Arc::new(FakeRepo::with_sessions(&[
            (9, 100, "rc.msg.x"),
            (10, 200, "rc.msg.y"),
        ]));
        let broker = Arc::new(FakeBroker::default());
        let service = LiveForwarderService::new(repo, broker.clone());

        service.forward_message(&message(9)).await.expect("forward");

        let published = broker.published.lock().expect("lock");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "rc.msg.x");
    }

    #[tokio::test]
    async fn no_subscribers_means_no_publishes() {
        let repo = Arc::new(FakeRepo::new());
        let broker = Arc::new(FakeBroker::default());
        let service = LiveForwarderService::new(repo, broker.clone());

        service.forward_message(&message(9)).await.expect("forward");
        assert!(broker.published.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn one_failed_republish_fails_the_whole_step() {
        let repo = Arc::new(FakeRepo::with_sessions(&[
            (9, 100, "rc.msg.x"),
            (9, 200, "rc.msg.y"),
        ]));
        let broker = Arc::new(FakeBroker {
            published: Mutex::new(Vec::new()),
            failing_topic: Some("rc.msg.y".into()),
        });
        let service = LiveForwarderService::new(repo, broker);

        // The caller must not ack; redelivery retries the whole fan-out and
        // chat instances tolerate the duplicate to rc.msg.x.
        assert!(service.forward_message(&message(9)).await.is_err());
    }

    #[tokio::test]
    async fn register_is_an_upsert_per_user() {
        let repo = Arc::new(FakeRepo::new());
        let service =
            LiveForwarderService::new(repo.clone(), Arc::new(FakeBroker::default()));

        service
            .register_channel_session(9, 100, "rc.msg.x")
            .await
            .expect("register");
        // The user's session moved to another instance.
        service
            .register_channel_session(9, 100, "rc.msg.z")
            .await
            .expect("register");

        let subscribers = repo.subscribers(9).await.expect("subscribers");
        assert_eq!(subscribers, HashSet::from(["rc.msg.z".to_string()]));

        service
            .remove_channel_session(9, 100)
            .await
            .expect("remove");
        assert!(repo.subscribers(9).await.expect("subscribers").is_empty());
    }
}
