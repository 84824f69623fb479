//! Key-value backend abstraction.
//!
//! The store talks to its physical backend through [`KvBackend`], a thin
//! interface over a TTL-capable key-value service: hash maps, sorted sets,
//! per-key expiry, and pipelined write submission. Implementations own
//! connection lifecycle only; retry policy belongs to the caller or a
//! wrapping resilience layer, never to the backend itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a key-value backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or the connection was lost.
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// A command was rejected or failed server-side.
    #[error("backend command failed: {0}")]
    Command(String),
}

/// A single write in a pipelined submission.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    /// Set fields on the hash map at `key`, creating the key if absent.
    /// Existing fields not named here are left in place.
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Add `member` to the sorted set at `key`, or update its score if
    /// already present.
    SortedAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// Set the time-to-live on `key`. No-op when the key does not exist.
    Expire { key: String, ttl: Duration },
    /// Remove `key` and whatever is stored under it.
    Delete { key: String },
}

/// Thin interface over a TTL-capable key-value store.
///
/// All reads are single round trips. Writes go through [`submit`],
/// which batches a command list into one pipeline.
///
/// [`submit`]: KvBackend::submit
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Backend name for logging and diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Whether a live (non-expired) key exists.
    async fn key_exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Read one field of the hash map at `key`.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;

    /// Read all fields of the hash map at `key`. Missing keys read as an
    /// empty map, mirroring the underlying store.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError>;

    /// Read several hash maps in one pipelined round trip, in input order.
    async fn hash_get_all_multi(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, BackendError>;

    /// Score of `member` in the sorted set at `key`, if present.
    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError>;

    /// All members of the sorted set at `key`, ascending by score.
    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>, BackendError>;

    /// Submit a batch of writes as one pipeline.
    ///
    /// Commands are submitted together and applied in order, but there is
    /// no cross-key compare-and-swap: a concurrent writer may interleave
    /// between this pipeline and another touching the same keys. On
    /// failure, some prefix of the commands may already have landed;
    /// callers must not assume rollback.
    async fn submit(&self, commands: Vec<WriteCommand>) -> Result<(), BackendError>;
}
