use axum::{
    Json, Router,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    LatencyUnit,
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::error::Error;

/// JSON body of every HTTP error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Default success body for endpoints with nothing else to say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessBody {
    pub message: String,
}

impl SuccessBody {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            message: "ok".into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        // Internal failure details stay in the logs, not on the wire.
        let message = if status == http::StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

/// Wrap a router in the standard middleware stack: request-id propagation,
/// trace logging, CORS (all origins), panic recovery, and a global
/// concurrency limit. Excess requests wait for a slot rather than erroring.
#[must_use]
pub fn apply_middleware(router: Router, max_conn: usize) -> Router {
    router
        .layer(GlobalConcurrencyLimitLayer::new(max_conn))
        .layer(CatchPanicLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
