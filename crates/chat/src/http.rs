//! HTTP/websocket surface of the chat service.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, Request, State, WebSocketUpgrade},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Deserialize;

use chatr_common::{Error, Result, http::SuccessBody, keys};
use chatr_token::AccessTokens;

use crate::{
    clients::ForwarderGateway,
    dto::{MessagesDto, UserIdsDto},
    service::{ChannelService, ChatService, UserService},
    ws::{SessionRegistry, handle_connection},
};

/// Shared handler state for one chat instance.
pub struct ChatState {
    pub tokens: Arc<AccessTokens>,
    pub users: Arc<dyn UserService>,
    pub chat: Arc<dyn ChatService>,
    pub channels: Arc<dyn ChannelService>,
    pub forwarder: Arc<dyn ForwarderGateway>,
    pub registry: Arc<SessionRegistry>,
    /// This instance's private broker topic, registered per session.
    pub subscriber_id: String,
    /// Websocket frames above this size are rejected by the socket layer.
    pub max_frame_bytes: usize,
}

/// The channel id a verified JWT grants, attached by the auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct ChannelId(pub u64);

pub fn router(state: Arc<ChatState>) -> Router {
    let protected = Router::new()
        .route("/api/chat/forwarderauth", get(forward_auth))
        .route("/api/chat/user", get(get_channel_users))
        .route("/api/chat/user/online", get(get_online_users))
        .route("/api/chat/channel/messages", get(list_messages))
        .route("/api/chat/channel", delete(delete_channel))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            jwt_auth,
        ));

    Router::new()
        .route("/api/chat", get(start_chat))
        .merge(protected)
        .with_state(state)
}

// ── Auth middleware ─────────────────────────────────────────────────────────

async fn jwt_auth(
    State(state): State<Arc<ChatState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request) else {
        return Error::Unauthorized.into_response();
    };
    match state.tokens.verify(&token) {
        Ok(channel_id) => {
            request.extensions_mut().insert(ChannelId(channel_id));
            next.run(request).await
        },
        Err(e) => Error::from(e).into_response(),
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = header.split_once(' ')?;
    (scheme == "Bearer" && !token.is_empty()).then(|| token.to_string())
}

// ── Handlers ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StartChatQuery {
    uid: String,
    access_token: String,
}

/// Upgrade to a chat websocket. Authorization runs before the upgrade:
/// the user must exist, the token must verify unexpired, and the
/// `(channel, user)` membership row must be present. Nothing is touched
/// on failure.
async fn start_chat(
    State(state): State<Arc<ChatState>>,
    Query(query): Query<StartChatQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let user_id: u64 = query.uid.parse().map_err(|_| Error::InvalidParam)?;
    state.users.get_user(user_id).await?;

    let channel_id = state
        .tokens
        .verify(&query.access_token)
        .map_err(Error::from)?;

    if !state.users.is_channel_member(channel_id, user_id).await? {
        return Err(Error::ChannelOrUserNotFound);
    }

    Ok(ws
        .max_message_size(state.max_frame_bytes)
        .max_frame_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, channel_id, user_id)))
}

/// Echo the channel id for the upload gateway's forward-auth check.
async fn forward_auth(
    axum::Extension(ChannelId(channel_id)): axum::Extension<ChannelId>,
) -> impl IntoResponse {
    (
        http::StatusCode::OK,
        [(keys::CHANNEL_ID_HEADER, channel_id.to_string())],
    )
}

async fn get_channel_users(
    State(state): State<Arc<ChatState>>,
    axum::Extension(ChannelId(channel_id)): axum::Extension<ChannelId>,
) -> Result<Json<UserIdsDto>> {
    let user_ids = state.users.channel_user_ids(channel_id).await?;
    Ok(Json(UserIdsDto {
        user_ids: user_ids.iter().map(u64::to_string).collect(),
    }))
}

async fn get_online_users(
    State(state): State<Arc<ChatState>>,
    axum::Extension(ChannelId(channel_id)): axum::Extension<ChannelId>,
) -> Result<Json<UserIdsDto>> {
    let user_ids = state.users.online_user_ids(channel_id).await?;
    Ok(Json(UserIdsDto {
        user_ids: user_ids.iter().map(u64::to_string).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    #[serde(default)]
    ps: String,
}

async fn list_messages(
    State(state): State<Arc<ChatState>>,
    axum::Extension(ChannelId(channel_id)): axum::Extension<ChannelId>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessagesDto>> {
    let (messages, next_page_state) = state.chat.list_messages(channel_id, &query.ps).await?;
    Ok(Json(MessagesDto {
        next_page_state,
        messages: messages.iter().map(|m| m.to_presenter()).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct DeleteChannelQuery {
    delby: String,
}

async fn delete_channel(
    State(state): State<Arc<ChatState>>,
    axum::Extension(ChannelId(channel_id)): axum::Extension<ChannelId>,
    Query(query): Query<DeleteChannelQuery>,
) -> Result<Json<SuccessBody>> {
    let user_id: u64 = query.delby.parse().map_err(|_| Error::InvalidParam)?;
    if !state.users.is_channel_member(channel_id, user_id).await? {
        return Err(Error::ChannelOrUserNotFound);
    }
    state.channels.delete_channel(channel_id).await?;
    Ok(Json(SuccessBody::ok()))
}
