//! Chat service: websocket termination, channel membership, message
//! persistence, and broadcast origination.
//!
//! Every instance publishes outgoing messages to the global topic and
//! consumes only its own per-instance topic; the forwarder decides which
//! instances receive which channels.

pub mod cache;
pub mod clients;
pub mod domain;
pub mod dto;
pub mod grpc;
pub mod http;
pub mod server;
pub mod service;
pub mod storage;
pub mod subscriber;
pub mod ws;

pub use {
    domain::{Action, Channel, Event, Message, User},
    server::run,
};
