//! Shared infrastructure clients: the Redis key-value store, the Kafka
//! broker, and the Cassandra-compatible wide-column store.

pub mod cassandra;
pub mod error;
pub mod kafka;
pub mod redis;

pub use {
    error::{Error, Result},
    kafka::{BrokerPublisher, Delivery, MessageHandler, Publisher, Subscriber},
    redis::RedisPool,
};
