use std::{future::Future, time::Duration};

use futures::FutureExt;
use tonic::{Response, Status, transport::Server};

/// Build a tonic server with the shared keep-alive policy: ping idle
/// clients every 5 s, drop them after a missed ack, and refuse clients
/// pinging more often than every 5 s.
#[must_use]
pub fn server_builder() -> Server {
    Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(5)))
        .http2_keepalive_timeout(Some(Duration::from_secs(1)))
        .http2_adaptive_window(Some(true))
        .tcp_keepalive(Some(Duration::from_secs(15)))
}

/// Run a handler future, converting a panic into `Internal` instead of
/// tearing down the connection. Recovered panics increment
/// `grpc_req_panics_recovered_total`.
pub async fn recover<T, F>(method: &str, handler: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    match std::panic::AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            metrics::counter!("grpc_req_panics_recovered_total").increment(1);
            let detail = panic_message(&panic);
            tracing::error!(method, detail, "recovered from panic in grpc handler");
            Err(Status::internal(detail.to_string()))
        },
    }
}

/// Map a domain error to its gRPC status, preserving the error kind.
#[must_use]
pub fn to_status(error: &chatr_common::Error) -> Status {
    use chatr_common::Error as E;
    match error {
        E::InvalidParam | E::ExceedMessageNum => Status::invalid_argument(error.to_string()),
        E::Unauthorized | E::TokenExpired | E::InvalidToken => {
            Status::unauthenticated(error.to_string())
        },
        E::UserNotFound | E::SessionNotFound | E::ChannelOrUserNotFound => {
            Status::not_found(error.to_string())
        },
        E::Unavailable { .. } => Status::unavailable(error.to_string()),
        E::Message(_) => Status::internal(error.to_string()),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "panic"
    }
}
