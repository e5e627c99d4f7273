//! Config schema. Option names mirror the deployment's configuration
//! surface (`chat.message.maxNum`, `redis.poolSize`, ...), so every field
//! serializes in camelCase.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatrConfig {
    pub cassandra: CassandraConfig,
    pub chat: ChatConfig,
    pub forwarder: ForwarderConfig,
    #[serde(rename = "match")]
    pub match_: MatchConfig,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
}

// ── Shared server/client blocks ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpServerConfig {
    pub port: u16,
    /// Concurrency cap; excess requests wait instead of erroring.
    pub max_conn: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            max_conn: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcServerConfig {
    pub port: u16,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self { port: 4000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcClientConfig {
    pub endpoint: String,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "reverse-proxy:80".into(),
        }
    }
}

// ── Chat service ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub http: ChatHttpConfig,
    pub grpc: ChatGrpcConfig,
    pub subscriber: SubscriberConfig,
    pub message: MessageConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHttpConfig {
    pub server: HttpServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatGrpcConfig {
    pub server: GrpcServerConfig,
    pub client: ChatGrpcClientConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatGrpcClientConfig {
    pub user: GrpcClientConfig,
    pub forwarder: GrpcClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// This instance's private broker topic. Must be unique per instance.
    pub id: String,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            id: format!(
                "{}{}",
                chatr_common::keys::MESSAGE_SUB_TOPIC_PREFIX,
                chatr_common::local_hostname()
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageConfig {
    /// Hard cap on stored messages per channel.
    pub max_num: i64,
    /// Page size for history listing.
    pub pagination_num: i32,
    /// Maximum websocket frame size accepted from clients.
    pub max_size_byte: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_num: 5000,
            pagination_num: 5000,
            max_size_byte: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_second: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "mysecret".into(),
            expiration_second: 86_400,
        }
    }
}

// ── Forwarder service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub grpc: ForwarderGrpcConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderGrpcConfig {
    pub server: GrpcServerConfig,
}

// ── Match service ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub http: MatchHttpConfig,
    pub grpc: MatchGrpcConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            http: MatchHttpConfig {
                server: HttpServerConfig {
                    port: 5002,
                    max_conn: 200,
                },
            },
            grpc: MatchGrpcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchHttpConfig {
    pub server: HttpServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchGrpcConfig {
    pub client: MatchGrpcClientConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchGrpcClientConfig {
    pub chat: GrpcClientConfig,
    pub user: GrpcClientConfig,
}

// ── Infrastructure ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated broker addresses.
    pub address: String,
    pub version: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            address: "kafka:9092".into(),
            version: "3.6.0".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisConfig {
    pub address: String,
    pub password: String,
    pub expiration_hours: i64,
    pub min_idle_connection: usize,
    pub pool_size: usize,
    pub read_timeout_milli_second: u64,
    pub write_timeout_milli_second: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".into(),
            password: String::new(),
            expiration_hours: 24,
            min_idle_connection: 16,
            pool_size: 64,
            read_timeout_milli_second: 3000,
            write_timeout_milli_second: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CassandraConfig {
    /// Comma-separated contact points.
    pub hosts: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub keyspace: String,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            hosts: "localhost".into(),
            port: 9042,
            user: String::new(),
            password: String::new(),
            keyspace: "chatr".into(),
        }
    }
}

impl CassandraConfig {
    /// Contact points as `host:port` pairs.
    #[must_use]
    pub fn known_nodes(&self) -> Vec<String> {
        self.hosts
            .split(',')
            .map(|h| format!("{}:{}", h.trim(), self.port))
            .collect()
    }
}

impl KafkaConfig {
    /// Broker list in the form librdkafka expects.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.address
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_defaults() {
        let config = ChatrConfig::default();
        assert_eq!(config.chat.message.max_num, 5000);
        assert_eq!(config.chat.message.max_size_byte, 4096);
        assert_eq!(config.chat.jwt.expiration_second, 86_400);
        assert_eq!(config.chat.http.server.max_conn, 200);
        assert_eq!(config.match_.http.server.port, 5002);
        assert_eq!(config.redis.pool_size, 64);
        assert_eq!(config.cassandra.keyspace, "chatr");
        assert!(config.chat.subscriber.id.starts_with("rc.msg."));
    }

    #[test]
    fn options_serialize_in_camel_case() {
        let json = serde_json::to_value(ChatrConfig::default()).expect("serialize");
        assert!(json["chat"]["message"]["maxNum"].is_i64());
        assert!(json["chat"]["jwt"]["expirationSecond"].is_u64());
        assert!(json["redis"]["minIdleConnection"].is_u64());
        assert!(json["match"]["http"]["server"]["maxConn"].is_u64());
    }

    #[test]
    fn cassandra_nodes_include_port() {
        let config = CassandraConfig {
            hosts: "a, b".into(),
            port: 9042,
            ..CassandraConfig::default()
        };
        assert_eq!(config.known_nodes(), vec!["a:9042", "b:9042"]);
    }
}
