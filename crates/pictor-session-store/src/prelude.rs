//! # Session Store Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use pictor_session_store::prelude::*;
//! ```

// Core trait and types
pub use crate::error::{ErrorCode, ErrorEnvelope, Severity, StoreError, StoreResult};
pub use crate::store::{
    DEFAULT_SESSION_TTL, SessionStore, StoreConfig, content_hash, generate_session_id,
};
pub use crate::traits::{BackendError, KvBackend, WriteCommand};

// In-memory implementation (always available)
pub use crate::in_memory::InMemoryKv;

// Optional implementations
#[cfg(feature = "redis")]
pub use crate::redis_backend::{RedisBackend, RedisConfig};

// Convenience functions
pub use crate::{create_memory_store, create_memory_store_with_config};

#[cfg(feature = "redis")]
pub use crate::{create_redis_store, create_redis_store_with_config};
