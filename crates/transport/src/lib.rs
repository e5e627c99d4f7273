//! gRPC transport plumbing shared by every service: client channels with
//! keep-alive pings, bounded retries with linear backoff and jitter, a
//! per-method circuit breaker, and panic recovery for server handlers.

pub mod breaker;
pub mod client;
pub mod retry;
pub mod server;

pub use {
    breaker::CircuitBreaker,
    client::connect,
    retry::retry_call,
    server::{recover, server_builder, to_status},
};
