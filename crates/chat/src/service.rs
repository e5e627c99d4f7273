//! Domain services: broadcast origination, channel lifecycle, and the
//! membership/online views the HTTP surface exposes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use chatr_common::{Error, IdGenerator, Result, keys, now_ms};
use chatr_infra::BrokerPublisher;
use chatr_token::AccessTokens;

use crate::{
    cache::OnlineUsersRepo,
    clients::UserGateway,
    domain::{Action, Channel, Event, Message, User},
    storage::{ChannelRepo, MembershipRepo, MessageRepo},
};

/// Mint the next snowflake id on the blocking pool: the generator sleeps
/// a 10 ms tick when a tick's sequence is exhausted, which must not stall
/// an async worker.
async fn next_id(ids: &Arc<IdGenerator>) -> Result<u64> {
    let ids = Arc::clone(ids);
    tokio::task::spawn_blocking(move || ids.next_id())
        .await
        .map_err(|e| Error::message(format!("id generation: {e}")))
}

// ── Chat service ────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn broadcast_text_message(
        &self,
        channel_id: u64,
        user_id: u64,
        payload: &str,
    ) -> Result<()>;
    async fn broadcast_file_message(
        &self,
        channel_id: u64,
        user_id: u64,
        payload: &str,
    ) -> Result<()>;
    async fn broadcast_action_message(
        &self,
        channel_id: u64,
        user_id: u64,
        action: Action,
    ) -> Result<()>;
    /// The greeting on connect: `waiting` when the caller is alone in the
    /// channel, `joined` otherwise.
    async fn broadcast_connect_message(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn mark_message_seen(
        &self,
        channel_id: u64,
        user_id: u64,
        message_id: u64,
    ) -> Result<()>;
    async fn list_messages(
        &self,
        channel_id: u64,
        page_state: &str,
    ) -> Result<(Vec<Message>, String)>;
}

pub struct LiveChatService {
    messages: Arc<dyn MessageRepo>,
    online: Arc<dyn OnlineUsersRepo>,
    broker: Arc<dyn BrokerPublisher>,
    ids: Arc<IdGenerator>,
}

impl LiveChatService {
    pub fn new(
        messages: Arc<dyn MessageRepo>,
        online: Arc<dyn OnlineUsersRepo>,
        broker: Arc<dyn BrokerPublisher>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            messages,
            online,
            broker,
            ids,
        }
    }

    async fn new_message(
        &self,
        event: Event,
        channel_id: u64,
        user_id: u64,
        payload: String,
    ) -> Result<Message> {
        Ok(Message {
            message_id: next_id(&self.ids).await?,
            event,
            channel_id,
            user_id,
            payload,
            seen: false,
            time: now_ms(),
        })
    }

    /// Publish to the global topic, keyed by channel id so every topic
    /// partitions the same way.
    async fn publish(&self, message: &Message) -> Result<()> {
        self.broker
            .publish(
                keys::MESSAGE_PUB_TOPIC,
                &message.channel_id.to_string(),
                &message.encode()?,
            )
            .await
    }

    /// TEXT and FILE: persist first, publish only if the row exists.
    async fn persist_and_publish(&self, message: Message) -> Result<()> {
        self.messages.insert_message(&message).await?;
        self.publish(&message).await
    }
}

#[async_trait]
impl ChatService for LiveChatService {
    async fn broadcast_text_message(
        &self,
        channel_id: u64,
        user_id: u64,
        payload: &str,
    ) -> Result<()> {
        let message = self
            .new_message(Event::Text, channel_id, user_id, payload.to_string())
            .await?;
        self.persist_and_publish(message).await
    }

    async fn broadcast_file_message(
        &self,
        channel_id: u64,
        user_id: u64,
        payload: &str,
    ) -> Result<()> {
        let message = self
            .new_message(Event::File, channel_id, user_id, payload.to_string())
            .await?;
        self.persist_and_publish(message).await
    }

    async fn broadcast_action_message(
        &self,
        channel_id: u64,
        user_id: u64,
        action: Action,
    ) -> Result<()> {
        let message = self
            .new_message(Event::Action, channel_id, user_id, action.as_str().to_string())
            .await?;
        self.publish(&message).await
    }

    async fn broadcast_connect_message(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let action = if self.online.online_count(channel_id).await? <= 1 {
            Action::Waiting
        } else {
            Action::Joined
        };
        self.broadcast_action_message(channel_id, user_id, action)
            .await
    }

    async fn mark_message_seen(
        &self,
        channel_id: u64,
        user_id: u64,
        message_id: u64,
    ) -> Result<()> {
        self.messages
            .mark_message_seen(channel_id, message_id)
            .await?;
        let mut message = self
            .new_message(Event::Seen, channel_id, user_id, message_id.to_string())
            .await?;
        message.seen = true;
        self.publish(&message).await
    }

    async fn list_messages(
        &self,
        channel_id: u64,
        page_state: &str,
    ) -> Result<(Vec<Message>, String)> {
        self.messages.list_messages(channel_id, page_state).await
    }
}

// ── Channel service ─────────────────────────────────────────────────────────

#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Generate a channel id, insert the sentinel membership row, and mint
    /// the access token.
    async fn create_channel(&self) -> Result<Channel>;
    async fn delete_channel(&self, channel_id: u64) -> Result<()>;
}

pub struct LiveChannelService {
    channels: Arc<dyn ChannelRepo>,
    online: Arc<dyn OnlineUsersRepo>,
    tokens: Arc<AccessTokens>,
    ids: Arc<IdGenerator>,
}

impl LiveChannelService {
    pub fn new(
        channels: Arc<dyn ChannelRepo>,
        online: Arc<dyn OnlineUsersRepo>,
        tokens: Arc<AccessTokens>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            channels,
            online,
            tokens,
            ids,
        }
    }
}

#[async_trait]
impl ChannelService for LiveChannelService {
    async fn create_channel(&self) -> Result<Channel> {
        let channel_id = next_id(&self.ids).await?;
        self.channels.create_channel(channel_id).await?;
        let access_token = self.tokens.mint(channel_id).map_err(Error::from)?;
        info!(channel_id, "channel created");
        Ok(Channel {
            id: channel_id,
            access_token,
        })
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        self.channels.delete_channel(channel_id).await?;
        self.online.evict_channel(channel_id).await?;
        info!(channel_id, "channel deleted");
        Ok(())
    }
}

// ── User service ────────────────────────────────────────────────────────────

#[async_trait]
pub trait UserService: Send + Sync {
    /// Resolve a user via the external user service.
    async fn get_user(&self, user_id: u64) -> Result<User>;
    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn is_channel_member(&self, channel_id: u64, user_id: u64) -> Result<bool>;
    async fn channel_user_ids(&self, channel_id: u64) -> Result<Vec<u64>>;
    async fn online_user_ids(&self, channel_id: u64) -> Result<Vec<u64>>;
    async fn add_online_user(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn delete_online_user(&self, channel_id: u64, user_id: u64) -> Result<()>;
}

pub struct LiveUserService {
    users: Arc<dyn UserGateway>,
    membership: Arc<dyn MembershipRepo>,
    online: Arc<dyn OnlineUsersRepo>,
}

impl LiveUserService {
    pub fn new(
        users: Arc<dyn UserGateway>,
        membership: Arc<dyn MembershipRepo>,
        online: Arc<dyn OnlineUsersRepo>,
    ) -> Self {
        Self {
            users,
            membership,
            online,
        }
    }
}

#[async_trait]
impl UserService for LiveUserService {
    async fn get_user(&self, user_id: u64) -> Result<User> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(Error::UserNotFound)
    }

    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.membership.add_user_to_channel(channel_id, user_id).await
    }

    async fn is_channel_member(&self, channel_id: u64, user_id: u64) -> Result<bool> {
        self.membership.is_channel_member(channel_id, user_id).await
    }

    async fn channel_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
        self.membership.channel_user_ids(channel_id).await
    }

    async fn online_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
        self.online.online_user_ids(channel_id).await
    }

    async fn add_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.online.add_online_user(channel_id, user_id).await
    }

    async fn delete_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.online.delete_online_user(channel_id, user_id).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    // ── Fakes ───────────────────────────────────────────────────────────────

    #[derive(Default)]
    pub struct FakeMessageRepo {
        pub stored: Mutex<Vec<Message>>,
        pub seen_marks: Mutex<Vec<(u64, u64)>>,
        pub cap_reached: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MessageRepo for FakeMessageRepo {
        async fn insert_message(&self, message: &Message) -> Result<()> {
            if self.cap_reached.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::ExceedMessageNum);
            }
            self.stored.lock().expect("lock").push(message.clone());
            Ok(())
        }

        async fn mark_message_seen(&self, channel_id: u64, message_id: u64) -> Result<()> {
            self.seen_marks
                .lock()
                .expect("lock")
                .push((channel_id, message_id));
            Ok(())
        }

        async fn list_messages(
            &self,
            channel_id: u64,
            _page_state: &str,
        ) -> Result<(Vec<Message>, String)> {
            let messages = self
                .stored
                .lock()
                .expect("lock")
                .iter()
                .filter(|m| m.channel_id == channel_id)
                .cloned()
                .collect();
            Ok((messages, String::new()))
        }
    }

    #[derive(Default)]
    pub struct FakeBroker {
        pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    impl FakeBroker {
        pub fn messages(&self) -> Vec<Message> {
            self.published
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, _, payload)| Message::decode(payload).expect("decode"))
                .collect()
        }
    }

    #[async_trait]
    impl BrokerPublisher for FakeBroker {
        async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
            self.published.lock().expect("lock").push((
                topic.to_string(),
                key.to_string(),
                payload.to_vec(),
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeOnlineUsers {
        pub online: Mutex<Vec<(u64, u64)>>,
        pub evicted: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl OnlineUsersRepo for FakeOnlineUsers {
        async fn add_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
            let mut online = self.online.lock().expect("lock");
            if !online.contains(&(channel_id, user_id)) {
                online.push((channel_id, user_id));
            }
            Ok(())
        }

        async fn delete_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
            self.online
                .lock()
                .expect("lock")
                .retain(|entry| *entry != (channel_id, user_id));
            Ok(())
        }

        async fn online_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
            Ok(self
                .online
                .lock()
                .expect("lock")
                .iter()
                .filter(|(c, _)| *c == channel_id)
                .map(|(_, u)| *u)
                .collect())
        }

        async fn online_count(&self, channel_id: u64) -> Result<u64> {
            Ok(self.online_user_ids(channel_id).await?.len() as u64)
        }

        async fn evict_channel(&self, channel_id: u64) -> Result<()> {
            self.evicted.lock().expect("lock").push(channel_id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeChannelRepo {
        pub created: Mutex<Vec<u64>>,
        pub deleted: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ChannelRepo for FakeChannelRepo {
        async fn create_channel(&self, channel_id: u64) -> Result<()> {
            self.created.lock().expect("lock").push(channel_id);
            Ok(())
        }

        async fn delete_channel(&self, channel_id: u64) -> Result<()> {
            self.deleted.lock().expect("lock").push(channel_id);
            Ok(())
        }
    }

    fn chat_service(
        repo: Arc<FakeMessageRepo>,
        online: Arc<FakeOnlineUsers>,
        broker: Arc<FakeBroker>,
    ) -> LiveChatService {
        LiveChatService::new(
            repo,
            online,
            broker,
            Arc::new(IdGenerator::with_machine_id(7)),
        )
    }

    // ── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_is_persisted_then_published() {
        let repo = Arc::new(FakeMessageRepo::default());
        let broker = Arc::new(FakeBroker::default());
        let service = chat_service(repo.clone(), Arc::new(FakeOnlineUsers::default()), broker.clone());

        service
            .broadcast_text_message(9, 100, "hi")
            .await
            .expect("broadcast");

        let stored = repo.stored.lock().expect("lock");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, "hi");
        assert_eq!(stored[0].event, Event::Text);

        let published = broker.messages();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_id, stored[0].message_id);
        // Keyed by channel id so the topic partitions per channel.
        assert_eq!(broker.published.lock().expect("lock")[0].1, "9");
        assert_eq!(
            broker.published.lock().expect("lock")[0].0,
            keys::MESSAGE_PUB_TOPIC
        );
    }

    #[tokio::test]
    async fn capped_channel_rejects_and_publishes_nothing() {
        let repo = Arc::new(FakeMessageRepo::default());
        repo.cap_reached
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let broker = Arc::new(FakeBroker::default());
        let service = chat_service(repo.clone(), Arc::new(FakeOnlineUsers::default()), broker.clone());

        let result = service.broadcast_text_message(9, 100, "over").await;
        assert!(matches!(result, Err(Error::ExceedMessageNum)));
        assert!(broker.published.lock().expect("lock").is_empty());
        assert!(repo.stored.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn actions_are_published_but_never_stored() {
        let repo = Arc::new(FakeMessageRepo::default());
        let broker = Arc::new(FakeBroker::default());
        let service = chat_service(repo.clone(), Arc::new(FakeOnlineUsers::default()), broker.clone());

        service
            .broadcast_action_message(9, 100, Action::IsTyping)
            .await
            .expect("broadcast");

        assert!(repo.stored.lock().expect("lock").is_empty());
        let published = broker.messages();
        assert_eq!(published[0].event, Event::Action);
        assert_eq!(published[0].payload, "istyping");
    }

    #[tokio::test]
    async fn seen_is_idempotent_and_publishes_each_time() {
        let repo = Arc::new(FakeMessageRepo::default());
        let broker = Arc::new(FakeBroker::default());
        let service = chat_service(repo.clone(), Arc::new(FakeOnlineUsers::default()), broker.clone());

        service.mark_message_seen(9, 200, 555).await.expect("seen");
        service.mark_message_seen(9, 200, 555).await.expect("seen");

        assert_eq!(
            repo.seen_marks.lock().expect("lock").as_slice(),
            &[(9, 555), (9, 555)]
        );
        let published = broker.messages();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].event, Event::Seen);
        assert_eq!(published[0].payload, "555");
        assert!(published[0].seen);
    }

    #[tokio::test]
    async fn first_user_in_channel_waits_second_joins() {
        let repo = Arc::new(FakeMessageRepo::default());
        let online = Arc::new(FakeOnlineUsers::default());
        let broker = Arc::new(FakeBroker::default());
        let service = chat_service(repo, online.clone(), broker.clone());

        online.add_online_user(9, 100).await.expect("add");
        service
            .broadcast_connect_message(9, 100)
            .await
            .expect("broadcast");

        online.add_online_user(9, 200).await.expect("add");
        service
            .broadcast_connect_message(9, 200)
            .await
            .expect("broadcast");

        let published = broker.messages();
        assert_eq!(published[0].payload, "waiting");
        assert_eq!(published[1].payload, "joined");
    }

    #[tokio::test]
    async fn created_channel_token_opens_that_channel() {
        let channels = Arc::new(FakeChannelRepo::default());
        let online = Arc::new(FakeOnlineUsers::default());
        let tokens = Arc::new(AccessTokens::new("mysecret", 60));
        let service = LiveChannelService::new(
            channels.clone(),
            online,
            tokens.clone(),
            Arc::new(IdGenerator::with_machine_id(7)),
        );

        let channel = service.create_channel().await.expect("create");
        assert_eq!(
            channels.created.lock().expect("lock").as_slice(),
            &[channel.id]
        );
        assert_eq!(
            tokens.verify(&channel.access_token).expect("verify"),
            channel.id
        );
    }

    #[tokio::test]
    async fn channel_ids_never_repeat() {
        let service = LiveChannelService::new(
            Arc::new(FakeChannelRepo::default()),
            Arc::new(FakeOnlineUsers::default()),
            Arc::new(AccessTokens::new("mysecret", 60)),
            Arc::new(IdGenerator::with_machine_id(7)),
        );
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let channel = service.create_channel().await.expect("create");
            assert!(seen.insert(channel.id));
        }
    }

    #[tokio::test]
    async fn deleting_a_channel_evicts_its_caches() {
        let channels = Arc::new(FakeChannelRepo::default());
        let online = Arc::new(FakeOnlineUsers::default());
        let service = LiveChannelService::new(
            channels.clone(),
            online.clone(),
            Arc::new(AccessTokens::new("mysecret", 60)),
            Arc::new(IdGenerator::with_machine_id(7)),
        );

        service.delete_channel(41).await.expect("delete");
        assert_eq!(channels.deleted.lock().expect("lock").as_slice(), &[41]);
        assert_eq!(online.evicted.lock().expect("lock").as_slice(), &[41]);
    }

    #[tokio::test]
    async fn unknown_user_maps_to_not_found() {
        struct NoUsers;
        #[async_trait]
        impl UserGateway for NoUsers {
            async fn get_user(&self, _user_id: u64) -> Result<Option<User>> {
                Ok(None)
            }
        }
        struct NoMembers;
        #[async_trait]
        impl MembershipRepo for NoMembers {
            async fn add_user_to_channel(&self, _c: u64, _u: u64) -> Result<()> {
                Ok(())
            }
            async fn is_channel_member(&self, _c: u64, _u: u64) -> Result<bool> {
                Ok(false)
            }
            async fn channel_user_ids(&self, _c: u64) -> Result<Vec<u64>> {
                Ok(Vec::new())
            }
        }

        let service = LiveUserService::new(
            Arc::new(NoUsers),
            Arc::new(NoMembers),
            Arc::new(FakeOnlineUsers::default()),
        );
        assert!(matches!(service.get_user(1).await, Err(Error::UserNotFound)));
    }
}
