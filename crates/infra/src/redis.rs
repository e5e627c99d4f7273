use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::info;

use chatr_config::RedisConfig;

use crate::error::{Error, Result};

/// Round-robin pool of multiplexed Redis connections.
///
/// Each entry is an auto-reconnecting multiplexed connection, so the pool
/// pre-opens `minIdleConnection` of them (bounded by `poolSize`) rather than
/// one socket per in-flight command. Every operation carries the configured
/// read or write timeout, and hash writes refresh the namespace TTL
/// (`expirationHours`) so state orphaned by a crashed instance eventually
/// clears itself.
pub struct RedisPool {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    read_timeout: Duration,
    write_timeout: Duration,
    entry_ttl_secs: i64,
}

impl RedisPool {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = if config.password.is_empty() {
            format!("redis://{}", config.address)
        } else {
            format!("redis://:{}@{}", config.password, config.address)
        };
        let client = redis::Client::open(url).map_err(|source| Error::Redis {
            op: "open",
            source,
        })?;

        let size = config
            .min_idle_connection
            .clamp(1, config.pool_size.max(1));
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let manager = client
                .get_connection_manager()
                .await
                .map_err(|source| Error::Redis {
                    op: "connect",
                    source,
                })?;
            connections.push(manager);
        }
        info!(address = %config.address, connections = size, "redis pool ready");

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            read_timeout: Duration::from_millis(config.read_timeout_milli_second),
            write_timeout: Duration::from_millis(config.write_timeout_milli_second),
            entry_ttl_secs: config.expiration_hours * 3600,
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    async fn run<T>(
        &self,
        limit: Duration,
        op: &'static str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(Error::Redis { op, source }),
            Err(_) => Err(Error::RedisTimeout { op }),
        }
    }

    // ── Hashes ──────────────────────────────────────────────────────────────

    /// `HSET key field value`, refreshing the key's TTL in the same
    /// transaction.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(key, field, value)
            .ignore()
            .expire(key, self.entry_ttl_secs)
            .ignore();
        self.run(self.write_timeout, "hset", pipe.query_async::<()>(&mut conn))
            .await
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.connection();
        self.run(self.write_timeout, "hdel", conn.hdel(key, field))
            .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        self.run(self.read_timeout, "hget", conn.hget(key, field))
            .await
    }

    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.connection();
        self.run(self.read_timeout, "hexists", conn.hexists(key, field))
            .await
    }

    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        self.run(self.read_timeout, "hkeys", conn.hkeys(key)).await
    }

    pub async fn hlen(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        self.run(self.read_timeout, "hlen", conn.hlen(key)).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection();
        self.run(self.read_timeout, "hgetall", conn.hgetall(key))
            .await
    }

    // ── Sorted sets ─────────────────────────────────────────────────────────

    pub async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection();
        self.run(self.write_timeout, "zrem", conn.zrem(key, member))
            .await
    }

    // ── Keys ────────────────────────────────────────────────────────────────

    pub async fn del(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.connection();
        self.run(self.write_timeout, "del", conn.del(keys)).await
    }

    // ── Scripts ─────────────────────────────────────────────────────────────

    /// Run a server-side Lua script with string keys and args.
    pub async fn run_script<T: redis::FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[&str],
    ) -> Result<T> {
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(*arg);
        }
        let mut conn = self.connection();
        self.run(
            self.write_timeout,
            "eval",
            invocation.invoke_async(&mut conn),
        )
        .await
    }
}
