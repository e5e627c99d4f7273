//! Match service: pairs two waiting users into a fresh channel with
//! at-most-once semantics, then fans the access token out to both match
//! websockets wherever they are connected.

pub mod clients;
pub mod domain;
pub mod http;
pub mod repo;
pub mod server;
pub mod service;
pub mod subscriber;

pub use {domain::MatchResult, server::run};
