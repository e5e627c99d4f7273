//! Match websocket surface: `GET /api/match`, cookie-authenticated.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatr_common::{Error, Result};

use crate::{clients::UserGateway, service::MatchService};

const SESSION_COOKIE: &str = "sid";

// ── Session registry ────────────────────────────────────────────────────────

struct MatchSession {
    user_id: u64,
    sender: mpsc::UnboundedSender<String>,
}

/// Match websockets on this instance, keyed by conn id. A user may hold
/// several (reconnects); results go to all of them.
#[derive(Default)]
pub struct MatchSessionRegistry {
    sessions: RwLock<HashMap<String, MatchSession>>,
}

impl MatchSessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, conn_id: String, user_id: u64, sender: mpsc::UnboundedSender<String>) {
        self.sessions
            .write()
            .await
            .insert(conn_id, MatchSession { user_id, sender });
    }

    async fn remove(&self, conn_id: &str) {
        self.sessions.write().await.remove(conn_id);
    }

    pub async fn is_connected(&self, user_id: u64) -> bool {
        self.sessions
            .read()
            .await
            .values()
            .any(|session| session.user_id == user_id)
    }

    #[cfg(test)]
    pub(crate) async fn test_register(
        &self,
        conn_id: &str,
        user_id: u64,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.register(conn_id.to_string(), user_id, sender).await;
    }

    /// Send a frame to every session of `user_id`; dead sessions are
    /// dropped on the way.
    pub async fn send_to_user(&self, user_id: u64, frame: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| {
            session.user_id != user_id || session.sender.send(frame.to_string()).is_ok()
        });
    }
}

// ── HTTP surface ────────────────────────────────────────────────────────────

pub struct MatchState {
    pub users: Arc<dyn UserGateway>,
    pub service: Arc<dyn MatchService>,
    pub registry: Arc<MatchSessionRegistry>,
}

pub fn router(state: Arc<MatchState>) -> Router {
    Router::new()
        .route("/api/match", get(start_match))
        .with_state(state)
}

/// Upgrade to a match websocket. The session cookie resolves to a user id
/// via the external user service before the upgrade happens.
async fn start_match(
    State(state): State<Arc<MatchState>>,
    request_parts: http::request::Parts,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let session_id = cookie_value(&request_parts, SESSION_COOKIE).ok_or(Error::Unauthorized)?;
    let user_id = state
        .users
        .get_user_id_by_session(&session_id)
        .await?
        .ok_or(Error::Unauthorized)?;
    state
        .users
        .get_user(user_id)
        .await?
        .ok_or(Error::UserNotFound)?;

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, user_id)))
}

fn cookie_value(parts: &http::request::Parts, name: &str) -> Option<String> {
    let header = parts.headers.get(http::header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

async fn handle_connection(socket: WebSocket, state: Arc<MatchState>, user_id: u64) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user_id, "match: session connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = session_rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "match: write loop closed");
                break;
            }
        }
    });

    // Register before the pop-or-push round so a result published by the
    // peer's instance can already reach this socket.
    state
        .registry
        .register(conn_id.clone(), user_id, session_tx.clone())
        .await;

    match state.service.match_user(user_id).await {
        Ok(result) if result.matched => {
            if let Err(e) = state.service.broadcast_match_result(&result).await {
                warn!(conn_id = %conn_id, user_id, error = %e, "match: result broadcast failed");
            }
        },
        Ok(_) => {}, // WAITING until a peer arrives or the socket closes.
        Err(e) => warn!(conn_id = %conn_id, user_id, error = %e, "match: pop-or-push failed"),
    }

    // The match protocol has no client frames; just wait for the close.
    while let Some(received) = ws_rx.next().await {
        match received {
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    state.registry.remove(&conn_id).await;
    // Fresh task: wait-list cleanup must survive connection-task teardown.
    let cleanup_state = Arc::clone(&state);
    let cleanup = tokio::spawn(async move {
        if let Err(e) = cleanup_state
            .service
            .remove_user_from_wait_list(user_id)
            .await
        {
            warn!(user_id, error = %e, "match: wait-list cleanup failed");
        }
    });
    let _ = cleanup.await;

    info!(conn_id = %conn_id, user_id, "match: session closed");
    drop(session_tx);
    write_handle.abort();
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::extract::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::{MatchResult, User};

    struct StaticUsers;

    #[async_trait]
    impl UserGateway for StaticUsers {
        async fn get_user(&self, user_id: u64) -> Result<Option<User>> {
            Ok((user_id != 404).then(|| User {
                id: user_id,
                name: "someone".into(),
            }))
        }
        async fn get_user_id_by_session(&self, session_id: &str) -> Result<Option<u64>> {
            match session_id {
                "valid" => Ok(Some(100)),
                "ghost" => Ok(Some(404)),
                _ => Ok(None),
            }
        }
    }

    struct NoopService;

    #[async_trait]
    impl MatchService for NoopService {
        async fn match_user(&self, user_id: u64) -> Result<MatchResult> {
            Ok(MatchResult::unmatched(user_id))
        }
        async fn broadcast_match_result(&self, _result: &MatchResult) -> Result<()> {
            Ok(())
        }
        async fn remove_user_from_wait_list(&self, _user_id: u64) -> Result<()> {
            Ok(())
        }
    }

    fn test_router() -> Router {
        router(Arc::new(MatchState {
            users: Arc::new(StaticUsers),
            service: Arc::new(NoopService),
            registry: Arc::new(MatchSessionRegistry::new()),
        }))
    }

    fn upgrade_request(cookie: Option<&str>) -> Request {
        let mut builder = Request::builder()
            .uri("/api/match")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        builder.body(axum::body::Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn missing_cookie_is_unauthorized() {
        let response = test_router()
            .oneshot(upgrade_request(None))
            .await
            .expect("response");
        assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_session_is_unauthorized() {
        let response = test_router()
            .oneshot(upgrade_request(Some("sid=stale")))
            .await
            .expect("response");
        assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_for_a_deleted_user_is_not_found() {
        let response = test_router()
            .oneshot(upgrade_request(Some("sid=ghost")))
            .await
            .expect("response");
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn valid_session_upgrades() {
        let response = test_router()
            .oneshot(upgrade_request(Some("other=1; sid=valid")))
            .await
            .expect("response");
        assert_eq!(response.status(), http::StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn registry_routes_by_user_id() {
        let registry = MatchSessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register("a".into(), 100, tx_a).await;
        registry.register("b".into(), 200, tx_b).await;

        registry.send_to_user(100, "{\"accessToken\":\"t\"}").await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(registry.is_connected(200).await);
        registry.remove("b").await;
        assert!(!registry.is_connected(200).await);
    }
}
