//! Wide-column repositories.
//!
//! Layout: `channels(id, user_id)` clusters members under the channel key;
//! `messages(channel_id, id DESC)` makes the clustering order the history
//! order; `chanmsg_counters` carries a counter column enforcing the
//! per-channel message cap.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use scylla::{
    client::session::Session, statement::prepared::PreparedStatement, value::Counter,
};

use chatr_common::{Error, Result};
use chatr_config::MessageConfig;

use crate::domain::{Event, Message};

// ── Traits ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait MessageRepo: Send + Sync {
    /// Persist a message, enforcing the per-channel cap. Fails with
    /// `exceed max number of messages` without touching the counter.
    async fn insert_message(&self, message: &Message) -> Result<()>;
    /// Idempotent: marking an already-seen message is a no-op.
    async fn mark_message_seen(&self, channel_id: u64, message_id: u64) -> Result<()>;
    /// One page of history in clustering order (newest first). Returns the
    /// page and an opaque cursor, empty when the scan is done.
    async fn list_messages(&self, channel_id: u64, page_state: &str)
    -> Result<(Vec<Message>, String)>;
}

#[async_trait]
pub trait ChannelRepo: Send + Sync {
    async fn create_channel(&self, channel_id: u64) -> Result<()>;
    async fn delete_channel(&self, channel_id: u64) -> Result<()>;
}

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    /// Idempotent insert of `(channel_id, user_id)`.
    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn is_channel_member(&self, channel_id: u64, user_id: u64) -> Result<bool>;
    async fn channel_user_ids(&self, channel_id: u64) -> Result<Vec<u64>>;
}

// ── Page cursor ─────────────────────────────────────────────────────────────

/// The cursor is our own encoding — `base64("<channel_id>:<last_id>")` — so
/// it stays valid across process restarts and driver upgrades.
pub(crate) fn encode_cursor(channel_id: u64, last_id: u64) -> String {
    BASE64.encode(format!("{channel_id}:{last_id}"))
}

pub(crate) fn decode_cursor(cursor: &str, channel_id: u64) -> Result<u64> {
    let raw = BASE64.decode(cursor).map_err(|_| Error::InvalidParam)?;
    let text = String::from_utf8(raw).map_err(|_| Error::InvalidParam)?;
    let (cursor_channel, last_id) = text.split_once(':').ok_or(Error::InvalidParam)?;
    let cursor_channel: u64 = cursor_channel.parse().map_err(|_| Error::InvalidParam)?;
    // A cursor minted for another channel must not leak its history.
    if cursor_channel != channel_id {
        return Err(Error::InvalidParam);
    }
    last_id.parse().map_err(|_| Error::InvalidParam)
}

fn db_err(context: &str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::from(chatr_infra::Error::cassandra(context, source))
}

// ── Message repository ──────────────────────────────────────────────────────

pub struct ScyllaMessageRepo {
    session: Arc<Session>,
    max_num: i64,
    page_size: i32,
    insert: PreparedStatement,
    read_counter: PreparedStatement,
    bump_counter: PreparedStatement,
    set_seen: PreparedStatement,
    list_first: PreparedStatement,
    list_after: PreparedStatement,
}

impl ScyllaMessageRepo {
    pub async fn new(session: Arc<Session>, config: &MessageConfig) -> Result<Self> {
        let insert = session
            .prepare(
                "INSERT INTO messages (channel_id, id, event, user_id, payload, seen, time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .await
            .map_err(|e| db_err("prepare insert message", e))?;
        let read_counter = session
            .prepare("SELECT message_num FROM chanmsg_counters WHERE channel_id = ?")
            .await
            .map_err(|e| db_err("prepare read counter", e))?;
        let bump_counter = session
            .prepare(
                "UPDATE chanmsg_counters SET message_num = message_num + 1 WHERE channel_id = ?",
            )
            .await
            .map_err(|e| db_err("prepare bump counter", e))?;
        let set_seen = session
            .prepare("UPDATE messages SET seen = true WHERE channel_id = ? AND id = ?")
            .await
            .map_err(|e| db_err("prepare set seen", e))?;
        let list_first = session
            .prepare(
                "SELECT id, event, user_id, payload, seen, time FROM messages \
                 WHERE channel_id = ? LIMIT ?",
            )
            .await
            .map_err(|e| db_err("prepare list messages", e))?;
        let list_after = session
            .prepare(
                "SELECT id, event, user_id, payload, seen, time FROM messages \
                 WHERE channel_id = ? AND id < ? LIMIT ?",
            )
            .await
            .map_err(|e| db_err("prepare list messages after", e))?;

        Ok(Self {
            session,
            max_num: config.max_num,
            page_size: config.pagination_num,
            insert,
            read_counter,
            bump_counter,
            set_seen,
            list_first,
            list_after,
        })
    }

    async fn message_count(&self, channel_id: u64) -> Result<i64> {
        let result = self
            .session
            .execute_unpaged(&self.read_counter, (channel_id as i64,))
            .await
            .map_err(|e| db_err("read message counter", e))?;
        let rows = result
            .into_rows_result()
            .map_err(|e| db_err("read message counter rows", e))?;
        let row = rows
            .maybe_first_row::<(Counter,)>()
            .map_err(|e| db_err("decode message counter", e))?;
        Ok(row.map(|(count,)| count.0).unwrap_or(0))
    }
}

#[async_trait]
impl MessageRepo for ScyllaMessageRepo {
    async fn insert_message(&self, message: &Message) -> Result<()> {
        // Read-then-increment: two racing inserts at the cap may both pass,
        // so the cap can overshoot by the number of in-flight inserts.
        // The counter is monotonic either way.
        if self.message_count(message.channel_id).await? >= self.max_num {
            return Err(Error::ExceedMessageNum);
        }

        self.session
            .execute_unpaged(&self.insert, (
                message.channel_id as i64,
                message.message_id as i64,
                message.event.code(),
                message.user_id as i64,
                message.payload.as_str(),
                message.seen,
                message.time,
            ))
            .await
            .map_err(|e| db_err("insert message", e))?;

        self.session
            .execute_unpaged(&self.bump_counter, (message.channel_id as i64,))
            .await
            .map_err(|e| db_err("bump message counter", e))?;
        Ok(())
    }

    async fn mark_message_seen(&self, channel_id: u64, message_id: u64) -> Result<()> {
        self.session
            .execute_unpaged(&self.set_seen, (channel_id as i64, message_id as i64))
            .await
            .map_err(|e| db_err("mark message seen", e))?;
        Ok(())
    }

    async fn list_messages(
        &self,
        channel_id: u64,
        page_state: &str,
    ) -> Result<(Vec<Message>, String)> {
        let result = if page_state.is_empty() {
            self.session
                .execute_unpaged(&self.list_first, (channel_id as i64, self.page_size))
                .await
        } else {
            let last_id = decode_cursor(page_state, channel_id)?;
            self.session
                .execute_unpaged(&self.list_after, (
                    channel_id as i64,
                    last_id as i64,
                    self.page_size,
                ))
                .await
        }
        .map_err(|e| db_err("list messages", e))?;

        let rows = result
            .into_rows_result()
            .map_err(|e| db_err("list messages rows", e))?;

        let mut messages = Vec::new();
        for row in rows
            .rows::<(i64, i32, i64, String, bool, i64)>()
            .map_err(|e| db_err("decode message rows", e))?
        {
            let (id, event, user_id, payload, seen, time) =
                row.map_err(|e| db_err("decode message row", e))?;
            let event = Event::from_code(event)
                .ok_or_else(|| Error::message(format!("stored message has event {event}")))?;
            messages.push(Message {
                message_id: id as u64,
                event,
                channel_id,
                user_id: user_id as u64,
                payload,
                seen,
                time,
            });
        }

        let next_page_state = match messages.last() {
            Some(last) if messages.len() == self.page_size as usize => {
                encode_cursor(channel_id, last.message_id)
            },
            _ => String::new(),
        };
        Ok((messages, next_page_state))
    }
}

// ── Channel repository ──────────────────────────────────────────────────────

/// Sentinel member inserted at channel creation so a live channel always
/// has at least one membership row.
const CHANNEL_SENTINEL_USER: i64 = 0;

pub struct ScyllaChannelRepo {
    session: Arc<Session>,
    create: PreparedStatement,
    delete_members: PreparedStatement,
    delete_messages: PreparedStatement,
    delete_counter: PreparedStatement,
}

impl ScyllaChannelRepo {
    pub async fn new(session: Arc<Session>) -> Result<Self> {
        let create = session
            .prepare("INSERT INTO channels (id, user_id) VALUES (?, ?)")
            .await
            .map_err(|e| db_err("prepare create channel", e))?;
        let delete_members = session
            .prepare("DELETE FROM channels WHERE id = ?")
            .await
            .map_err(|e| db_err("prepare delete channel", e))?;
        let delete_messages = session
            .prepare("DELETE FROM messages WHERE channel_id = ?")
            .await
            .map_err(|e| db_err("prepare delete messages", e))?;
        let delete_counter = session
            .prepare("DELETE FROM chanmsg_counters WHERE channel_id = ?")
            .await
            .map_err(|e| db_err("prepare delete counter", e))?;
        Ok(Self {
            session,
            create,
            delete_members,
            delete_messages,
            delete_counter,
        })
    }
}

#[async_trait]
impl ChannelRepo for ScyllaChannelRepo {
    async fn create_channel(&self, channel_id: u64) -> Result<()> {
        self.session
            .execute_unpaged(&self.create, (channel_id as i64, CHANNEL_SENTINEL_USER))
            .await
            .map_err(|e| db_err("create channel", e))?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        let id = channel_id as i64;
        self.session
            .execute_unpaged(&self.delete_members, (id,))
            .await
            .map_err(|e| db_err("delete channel members", e))?;
        self.session
            .execute_unpaged(&self.delete_messages, (id,))
            .await
            .map_err(|e| db_err("delete channel messages", e))?;
        self.session
            .execute_unpaged(&self.delete_counter, (id,))
            .await
            .map_err(|e| db_err("delete channel counter", e))?;
        Ok(())
    }
}

// ── Membership repository ───────────────────────────────────────────────────

pub struct ScyllaMembershipRepo {
    session: Arc<Session>,
    insert: PreparedStatement,
    exists: PreparedStatement,
    list: PreparedStatement,
}

impl ScyllaMembershipRepo {
    pub async fn new(session: Arc<Session>) -> Result<Self> {
        let insert = session
            .prepare("INSERT INTO channels (id, user_id) VALUES (?, ?)")
            .await
            .map_err(|e| db_err("prepare add member", e))?;
        let exists = session
            .prepare("SELECT user_id FROM channels WHERE id = ? AND user_id = ?")
            .await
            .map_err(|e| db_err("prepare member exists", e))?;
        let list = session
            .prepare("SELECT user_id FROM channels WHERE id = ?")
            .await
            .map_err(|e| db_err("prepare list members", e))?;
        Ok(Self {
            session,
            insert,
            exists,
            list,
        })
    }
}

#[async_trait]
impl MembershipRepo for ScyllaMembershipRepo {
    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.session
            .execute_unpaged(&self.insert, (channel_id as i64, user_id as i64))
            .await
            .map_err(|e| db_err("add user to channel", e))?;
        Ok(())
    }

    async fn is_channel_member(&self, channel_id: u64, user_id: u64) -> Result<bool> {
        let result = self
            .session
            .execute_unpaged(&self.exists, (channel_id as i64, user_id as i64))
            .await
            .map_err(|e| db_err("member exists", e))?;
        let rows = result
            .into_rows_result()
            .map_err(|e| db_err("member exists rows", e))?;
        let row = rows
            .maybe_first_row::<(i64,)>()
            .map_err(|e| db_err("decode member row", e))?;
        Ok(row.is_some())
    }

    async fn channel_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
        let result = self
            .session
            .execute_unpaged(&self.list, (channel_id as i64,))
            .await
            .map_err(|e| db_err("list members", e))?;
        let rows = result
            .into_rows_result()
            .map_err(|e| db_err("list members rows", e))?;
        let mut user_ids = Vec::new();
        for row in rows
            .rows::<(i64,)>()
            .map_err(|e| db_err("decode member rows", e))?
        {
            let (user_id,) = row.map_err(|e| db_err("decode member row", e))?;
            user_ids.push(user_id as u64);
        }
        Ok(user_ids)
    }
}
