//! Websocket session handling: one reader task and one writer task per
//! connection, a local registry for channel-filtered fan-out, and the
//! close contract that releases shared state.

use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatr_common::Error;

use crate::{
    domain::{Action, Event},
    dto::MessageDto,
    http::ChatState,
};

// ── Session registry ────────────────────────────────────────────────────────

/// One live websocket session. The channel id comes from the verified
/// access token at upgrade time and never changes.
pub struct ChatSession {
    pub conn_id: String,
    pub channel_id: u64,
    pub user_id: u64,
    sender: mpsc::UnboundedSender<String>,
}

impl ChatSession {
    fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// All websocket sessions on this instance, keyed by conn id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: ChatSession) {
        let conn_id = session.conn_id.clone();
        self.sessions.write().await.insert(conn_id, session);
    }

    pub async fn remove(&self, conn_id: &str) -> Option<ChatSession> {
        self.sessions.write().await.remove(conn_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Deliver a frame to every local session attached to `channel_id` and
    /// no one else. Dead sessions are dropped on the way.
    pub async fn broadcast_to_channel(&self, channel_id: u64, frame: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.channel_id != channel_id || session.send(frame));
    }
}

// ── Connection lifecycle ────────────────────────────────────────────────────

/// Drive one authorized websocket connection: register shared state, pump
/// frames, and run the close contract when the socket goes away.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<ChatState>,
    channel_id: u64,
    user_id: u64,
) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, channel_id, user_id, "chat: session connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: single writer per session keeps send order == receive order.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = session_rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "chat: write loop closed");
                break;
            }
        }
    });

    state
        .registry
        .register(ChatSession {
            conn_id: conn_id.clone(),
            channel_id,
            user_id,
            sender: session_tx.clone(),
        })
        .await;

    // LIVE once the shared state knows about this session: online set,
    // forwarder registration, then the connect greeting.
    if let Err(e) = initialize_session(&state, channel_id, user_id).await {
        warn!(conn_id = %conn_id, error = %e, "chat: session initialization failed");
        state.registry.remove(&conn_id).await;
        drop(session_tx);
        write_handle.abort();
        return;
    }

    // Read loop.
    while let Some(received) = ws_rx.next().await {
        let frame = match received {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "chat: read error");
                break;
            },
        };

        if let Err(e) = dispatch_frame(&state, channel_id, &frame).await {
            // A bad or over-cap frame never tears the session down.
            warn!(conn_id = %conn_id, channel_id, error = %e, "chat: frame dropped");
        }
    }

    // Close contract: run in a fresh task so cancellation of the
    // connection task cannot leak OnlineUsers/Subscribers entries.
    state.registry.remove(&conn_id).await;
    let cleanup_state = Arc::clone(&state);
    let cleanup = tokio::spawn(async move {
        close_session(&cleanup_state, channel_id, user_id).await;
    });
    let _ = cleanup.await;

    info!(conn_id = %conn_id, channel_id, user_id, "chat: session closed");
    drop(session_tx);
    write_handle.abort();
}

async fn initialize_session(state: &ChatState, channel_id: u64, user_id: u64) -> chatr_common::Result<()> {
    state.users.add_online_user(channel_id, user_id).await?;
    state
        .forwarder
        .register_channel_session(channel_id, user_id, &state.subscriber_id)
        .await?;
    state
        .chat
        .broadcast_connect_message(channel_id, user_id)
        .await
}

/// Cleanup is best-effort: each step runs regardless of earlier failures,
/// and Redis TTLs catch whatever slips through.
async fn close_session(state: &ChatState, channel_id: u64, user_id: u64) {
    if let Err(e) = state.users.delete_online_user(channel_id, user_id).await {
        warn!(channel_id, user_id, error = %e, "chat: online-user cleanup failed");
    }
    if let Err(e) = state
        .forwarder
        .remove_channel_session(channel_id, user_id)
        .await
    {
        warn!(channel_id, user_id, error = %e, "chat: subscriber cleanup failed");
    }
    if let Err(e) = state
        .chat
        .broadcast_action_message(channel_id, user_id, Action::Offline)
        .await
    {
        warn!(channel_id, user_id, error = %e, "chat: offline broadcast failed");
    }
}

/// Decode one client frame and dispatch on its event. The channel id comes
/// from the session, never from the frame.
async fn dispatch_frame(state: &ChatState, channel_id: u64, frame: &str) -> chatr_common::Result<()> {
    let dto = MessageDto::decode(frame.as_bytes())?;
    let user_id = dto.user_id()?;

    match dto.event {
        Event::Text => {
            state
                .chat
                .broadcast_text_message(channel_id, user_id, &dto.payload)
                .await
        },
        Event::File => {
            state
                .chat
                .broadcast_file_message(channel_id, user_id, &dto.payload)
                .await
        },
        Event::Action => {
            let action = Action::from_payload(&dto.payload).ok_or(Error::InvalidParam)?;
            state
                .chat
                .broadcast_action_message(channel_id, user_id, action)
                .await
        },
        Event::Seen => {
            let message_id: u64 = dto.payload.parse().map_err(|_| Error::InvalidParam)?;
            state
                .chat
                .mark_message_seen(channel_id, user_id, message_id)
                .await
        },
    }
}

#[cfg(test)]
pub(crate) fn test_session(
    conn_id: &str,
    channel_id: u64,
    user_id: u64,
    sender: mpsc::UnboundedSender<String>,
) -> ChatSession {
    ChatSession {
        conn_id: conn_id.to_string(),
        channel_id,
        user_id,
        sender,
    }
}
