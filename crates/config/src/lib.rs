//! Configuration loading and schema.
//!
//! Config files: `chatr.toml`, `chatr.yaml`, or `chatr.json`, searched in
//! `./` then `./config/`. Supports `${ENV_VAR}` substitution in all string
//! values, and per-option environment overrides built from the option path
//! (`chat.message.maxNum` → `CHAT_MESSAGE_MAXNUM`).

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        CassandraConfig, ChatConfig, ChatrConfig, ForwarderConfig, GrpcClientConfig,
        GrpcServerConfig, HttpServerConfig, JwtConfig, KafkaConfig, MatchConfig, MessageConfig,
        RedisConfig,
    },
};
