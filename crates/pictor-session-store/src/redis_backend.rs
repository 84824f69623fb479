//! Redis Key-Value Backend
//!
//! Production backend over a shared Redis service reachable by all
//! process instances. A [`ConnectionManager`] multiplexes one connection
//! and reconnects on failure; the store issues no retries of its own, so
//! failed commands surface to the caller immediately (retry policy
//! belongs to the caller or a wrapping resilience layer).
//!
//! Write pipelines map one-to-one onto a `redis::pipe()` submission.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::traits::{BackendError, KvBackend, WriteCommand};

/// Connection settings for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Bound on the initial connection handshake.
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Read the server URL from `REDIS_URL`, falling back to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.url = url;
        }
        config
    }
}

/// Redis-backed implementation of [`KvBackend`].
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect using configuration from the environment.
    pub async fn from_env() -> Result<Self, BackendError> {
        Self::connect(RedisConfig::from_env()).await
    }

    /// Connect to the configured server.
    pub async fn connect(config: RedisConfig) -> Result<Self, BackendError> {
        let client = Client::open(config.url.as_str()).map_err(classify)?;
        let manager = tokio::time::timeout(config.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                BackendError::Connection(format!("timed out connecting to {}", config.url))
            })?
            .map_err(classify)?;

        info!(url = %config.url, "redis backend connected");
        Ok(Self { manager })
    }
}

fn classify(err: redis::RedisError) -> BackendError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Command(err.to_string())
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn key_exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await.map_err(classify)?;
        Ok(exists)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.hget(key, field).await.map_err(classify)?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(classify)?;
        Ok(fields)
    }

    async fn hash_get_all_multi(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, BackendError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        let results: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(classify)?;
        Ok(results)
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError> {
        let mut conn = self.manager.clone();
        let score: Option<f64> = conn.zscore(key, member).await.map_err(classify)?;
        Ok(score)
    }

    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.zrange(key, 0, -1).await.map_err(classify)?;
        Ok(members)
    }

    async fn submit(&self, commands: Vec<WriteCommand>) -> Result<(), BackendError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        for command in &commands {
            match command {
                WriteCommand::HashSet { key, fields } => {
                    pipe.hset_multiple(key, fields).ignore();
                }
                WriteCommand::SortedAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                WriteCommand::Expire { key, ttl } => {
                    pipe.expire(key, ttl.as_secs() as i64).ignore();
                }
                WriteCommand::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        debug!(commands = commands.len(), "submitting pipeline");
        pipe.query_async::<()>(&mut conn).await.map_err(classify)
    }
}
