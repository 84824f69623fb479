//! # Pictor Session Store
//!
//! **Session-scoped, content-addressed metadata storage for image
//! conversations.**
//!
//! Tracks per-conversation sessions with automatic expiry, deduplicates
//! uploaded images by content hash so identical bytes are analyzed once
//! regardless of session, preserves strict upload ordering for ordinal
//! references ("the first image", "the last one"), and offers namespaced
//! per-session context slots for derived state such as conversation
//! history.
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! pictor-session-store = "0.1"
//!
//! # Enable the Redis backend
//! pictor-session-store = { version = "0.1", features = ["redis"] }
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use pictor_session_store::{create_memory_store, generate_session_id};
//! use serde_json::{json, Map, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pictor_session_store::StoreError> {
//! let store = create_memory_store();
//! let session_id = generate_session_id();
//! store.create_session(&session_id).await?;
//!
//! let metadata: Map<String, Value> =
//!     serde_json::from_value(json!({"exif": {"Make": "Canon"}})).unwrap();
//! let hash = store
//!     .store_image_metadata(&session_id, b"raw image bytes", &metadata)
//!     .await?;
//!
//! let record = store.get_image_metadata(&session_id, &hash).await?;
//! assert_eq!(record["exif"]["Make"], json!("Canon"));
//! # Ok(())
//! # }
//! ```

// Core trait and types
mod traits;
/// Key-value backend abstraction and pipelined write commands
pub use traits::{BackendError, KvBackend, WriteCommand};

mod error;
pub use error::{ErrorCode, ErrorEnvelope, Severity, StoreError, StoreResult};

mod metadata;
pub use metadata::RECOGNIZED_SECTIONS;

mod store;
pub use store::{
    DEFAULT_SESSION_TTL, SessionStore, StoreConfig, content_hash, generate_session_id,
};

// Implementations
pub mod in_memory;
pub mod prelude;

#[cfg(feature = "redis")]
pub mod redis_backend;

// Re-export for convenience
/// In-memory key-value backend for development and testing
pub use in_memory::InMemoryKv;

#[cfg(feature = "redis")]
/// Redis-backed key-value backend for production deployments
pub use redis_backend::{RedisBackend, RedisConfig};

use std::sync::Arc;

/// Create a session store over a fresh in-memory backend, for development
/// and testing.
pub fn create_memory_store() -> SessionStore {
    SessionStore::new(Arc::new(InMemoryKv::new()))
}

/// Create a session store over a fresh in-memory backend with custom TTLs.
pub fn create_memory_store_with_config(config: StoreConfig) -> SessionStore {
    SessionStore::with_config(Arc::new(InMemoryKv::new()), config)
}

/// Create a session store over a Redis backend configured from the
/// environment (`REDIS_URL`).
#[cfg(feature = "redis")]
pub async fn create_redis_store() -> Result<SessionStore, StoreError> {
    let backend = RedisBackend::from_env().await?;
    Ok(SessionStore::new(Arc::new(backend)))
}

/// Create a session store over a Redis backend with explicit connection
/// and TTL configuration.
#[cfg(feature = "redis")]
pub async fn create_redis_store_with_config(
    redis: RedisConfig,
    config: StoreConfig,
) -> Result<SessionStore, StoreError> {
    let backend = RedisBackend::connect(redis).await?;
    Ok(SessionStore::with_config(Arc::new(backend), config))
}
