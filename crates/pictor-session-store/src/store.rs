//! The session store: session lifecycle, content-addressed metadata,
//! upload ordering, and per-session context slots.
//!
//! Physical layout on the backend:
//! - `session:{id}` — hash map with `created_at` and `ctx:{key}` fields
//! - `session:{id}:upload_order` — sorted set, image hash scored by
//!   insertion time in epoch milliseconds
//! - `metadata:{hash}` — global hash map of flattened metadata fields,
//!   shared by every session that uploads the same bytes
//!
//! Multi-key writes go out as one pipeline per operation: submitted
//! together, applied in order, but with no cross-key compare-and-swap
//! (see [`KvBackend::submit`]). The store holds no mutable state of its
//! own and is safe to share across tasks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::metadata;
use crate::traits::{KvBackend, WriteCommand};

/// Default session (and upload-order index) time-to-live: one day.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(86_400);

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Session record and upload-order index time-to-live. Renewed on
    /// every session-scoped write and on [`SessionStore::touch_session`].
    pub session_ttl: Duration,
    /// Metadata record time-to-live. Deliberately longer than the session
    /// TTL so a record outlives the session that first stored it and can
    /// be reused by a later session uploading the same bytes.
    pub metadata_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_session_ttl(DEFAULT_SESSION_TTL)
    }
}

impl StoreConfig {
    /// Config with the given session TTL and the conventional 2x metadata
    /// TTL.
    pub fn with_session_ttl(session_ttl: Duration) -> Self {
        Self {
            session_ttl,
            metadata_ttl: session_ttl * 2,
        }
    }
}

/// Generate a fresh session id.
///
/// UUID v7, so ids of later sessions sort after earlier ones.
pub fn generate_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Content hash of raw image bytes: lowercase hex SHA-256, 64 characters.
///
/// The global, collision-resistant identifier under which metadata is
/// deduplicated across sessions.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn upload_order_key(session_id: &str) -> String {
    format!("session:{session_id}:upload_order")
}

fn metadata_key(hash: &str) -> String {
    format!("metadata:{hash}")
}

/// Session-scoped, content-addressed metadata store.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
}

impl SessionStore {
    /// Create a store with default TTLs over the given backend.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Self {
        debug!(
            backend = backend.backend_name(),
            session_ttl_secs = config.session_ttl.as_secs(),
            "session store initialized"
        );
        Self { backend, config }
    }

    async fn require_session(&self, session_id: &str) -> StoreResult<()> {
        if self.backend.key_exists(&session_key(session_id)).await? {
            Ok(())
        } else {
            Err(StoreError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Initialize a new session.
    ///
    /// Fails with [`StoreError::SessionAlreadyExists`] if a record for
    /// this id is present. Creation is deliberately non-idempotent: a
    /// duplicate create is treated as accidental session reuse, not
    /// renewal.
    pub async fn create_session(&self, session_id: &str) -> StoreResult<()> {
        if self.backend.key_exists(&session_key(session_id)).await? {
            return Err(StoreError::SessionAlreadyExists(session_id.to_string()));
        }
        self.backend
            .submit(vec![
                WriteCommand::HashSet {
                    key: session_key(session_id),
                    fields: vec![("created_at".to_string(), Utc::now().to_rfc3339())],
                },
                WriteCommand::Expire {
                    key: session_key(session_id),
                    ttl: self.config.session_ttl,
                },
            ])
            .await?;
        debug!(session_id, "created session");
        Ok(())
    }

    /// Refresh the session TTL on activity.
    ///
    /// Transport layers should call this on every inbound client action so
    /// active conversations stay alive.
    pub async fn touch_session(&self, session_id: &str) -> StoreResult<()> {
        self.require_session(session_id).await?;
        self.backend
            .submit(vec![
                WriteCommand::Expire {
                    key: session_key(session_id),
                    ttl: self.config.session_ttl,
                },
                WriteCommand::Expire {
                    key: upload_order_key(session_id),
                    ttl: self.config.session_ttl,
                },
            ])
            .await?;
        Ok(())
    }

    /// Remove a session and its upload-order index.
    ///
    /// Metadata records are left to their own TTLs: another live session
    /// may share them, and no reference counting is performed.
    pub async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        self.require_session(session_id).await?;
        self.backend
            .submit(vec![
                WriteCommand::Delete {
                    key: session_key(session_id),
                },
                WriteCommand::Delete {
                    key: upload_order_key(session_id),
                },
            ])
            .await?;
        debug!(session_id, "deleted session");
        Ok(())
    }

    /// Store image metadata under the content hash of `image_data`,
    /// record the upload in the session's order index, and renew the
    /// session TTL. Returns the hash: the canonical identifier for this
    /// content, for this and any future session.
    ///
    /// Re-storing under the same hash replaces the whole record; the
    /// index entry's timestamp is updated, so the most recent
    /// (re-)upload wins position in the ordering.
    pub async fn store_image_metadata(
        &self,
        session_id: &str,
        image_data: &[u8],
        metadata: &Map<String, Value>,
    ) -> StoreResult<String> {
        self.require_session(session_id).await?;
        metadata::validate_sections(metadata)?;

        let hash = content_hash(image_data);
        let fields = metadata::flatten(metadata)?;
        let uploaded_at = Utc::now().timestamp_millis() as f64;

        self.backend
            .submit(vec![
                WriteCommand::Delete {
                    key: metadata_key(&hash),
                },
                WriteCommand::HashSet {
                    key: metadata_key(&hash),
                    fields,
                },
                WriteCommand::Expire {
                    key: metadata_key(&hash),
                    ttl: self.config.metadata_ttl,
                },
                WriteCommand::SortedAdd {
                    key: upload_order_key(session_id),
                    member: hash.clone(),
                    score: uploaded_at,
                },
                WriteCommand::Expire {
                    key: upload_order_key(session_id),
                    ttl: self.config.session_ttl,
                },
                WriteCommand::Expire {
                    key: session_key(session_id),
                    ttl: self.config.session_ttl,
                },
            ])
            .await?;

        debug!(session_id, hash = %hash, "stored image metadata");
        Ok(hash)
    }

    /// Retrieve one image's metadata, gated on the hash being in this
    /// session's upload-order index. The record itself is globally
    /// addressable, but a session can only read hashes it uploaded.
    pub async fn get_image_metadata(
        &self,
        session_id: &str,
        image_hash: &str,
    ) -> StoreResult<Map<String, Value>> {
        self.require_session(session_id).await?;

        let indexed = self
            .backend
            .sorted_score(&upload_order_key(session_id), image_hash)
            .await?;
        if indexed.is_none() {
            return Err(StoreError::ImageNotInSession {
                session_id: session_id.to_string(),
                hash: image_hash.to_string(),
            });
        }

        let fields = self.backend.hash_get_all(&metadata_key(image_hash)).await?;
        if fields.is_empty() {
            // Indexed but gone: the index TTL and the record TTL are
            // independent, so a stale reference is possible. Callers
            // should treat this as a stale reference, not a session
            // failure.
            return Err(StoreError::MetadataNotFound(image_hash.to_string()));
        }

        Ok(metadata::restore(fields))
    }

    /// All of a session's image records in upload order, each with a
    /// `hash` field. Records that expired out from under the index are
    /// silently omitted.
    pub async fn get_session_images(
        &self,
        session_id: &str,
    ) -> StoreResult<Vec<Map<String, Value>>> {
        self.require_session(session_id).await?;
        let hashes = self
            .backend
            .sorted_range_all(&upload_order_key(session_id))
            .await?;
        self.batch_get_metadata(&hashes).await
    }

    /// Fetch records for `hashes` in order, deduplicating repeats before
    /// hitting the backend and dropping missing records rather than
    /// padding with nulls.
    async fn batch_get_metadata(&self, hashes: &[String]) -> StoreResult<Vec<Map<String, Value>>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = hashes
            .iter()
            .filter(|hash| seen.insert(hash.as_str()))
            .cloned()
            .collect();

        let keys: Vec<String> = unique.iter().map(|hash| metadata_key(hash)).collect();
        let all_fields = self.backend.hash_get_all_multi(&keys).await?;

        let mut records = Vec::with_capacity(unique.len());
        for (hash, fields) in unique.into_iter().zip(all_fields) {
            if fields.is_empty() {
                debug!(hash = %hash, "indexed metadata record expired, omitting");
                continue;
            }
            let mut record = metadata::restore(fields);
            record.insert("hash".to_string(), Value::String(hash));
            records.push(record);
        }
        Ok(records)
    }

    /// Store an arbitrary JSON value in the session's `ctx:{key}` slot
    /// and renew the session TTL. Keys are opaque to the store.
    pub async fn update_context(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> StoreResult<()> {
        self.require_session(session_id).await?;
        let payload = serde_json::to_string(&value)?;
        self.backend
            .submit(vec![
                WriteCommand::HashSet {
                    key: session_key(session_id),
                    fields: vec![(format!("ctx:{key}"), payload)],
                },
                WriteCommand::Expire {
                    key: session_key(session_id),
                    ttl: self.config.session_ttl,
                },
            ])
            .await?;
        Ok(())
    }

    /// Read back a context slot. `Ok(None)` when the key was never set.
    pub async fn get_context(&self, session_id: &str, key: &str) -> StoreResult<Option<Value>> {
        self.require_session(session_id).await?;
        let Some(text) = self
            .backend
            .hash_get(&session_key(session_id), &format!("ctx:{key}"))
            .await?
        else {
            return Ok(None);
        };
        let value = serde_json::from_str(&text)?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, Severity};
    use crate::in_memory::InMemoryKv;
    use serde_json::json;

    fn memory_store() -> (Arc<InMemoryKv>, SessionStore) {
        let backend = Arc::new(InMemoryKv::new());
        let store = SessionStore::new(backend.clone());
        (backend, store)
    }

    fn memory_store_with_ttl(session_ttl: Duration) -> (Arc<InMemoryKv>, SessionStore) {
        let backend = Arc::new(InMemoryKv::new());
        let store = SessionStore::with_config(
            backend.clone(),
            StoreConfig::with_session_ttl(session_ttl),
        );
        (backend, store)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn exif(make: &str) -> Map<String, Value> {
        object(json!({"exif": {"Make": make}}))
    }

    #[test]
    fn content_hash_is_64_hex_chars_and_deterministic() {
        let h1 = content_hash(b"image bytes");
        let h2 = content_hash(b"image bytes");
        let h3 = content_hash(b"other bytes");

        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn generated_session_ids_are_unique() {
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[tokio::test]
    async fn create_session_rejects_duplicates() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        let err = store.create_session("s1").await.unwrap_err();
        assert!(matches!(err, StoreError::SessionAlreadyExists(_)));
        assert_eq!(err.code(), ErrorCode::SessionAlreadyExists);
    }

    #[tokio::test]
    async fn every_operation_requires_an_existing_session() {
        let (_, store) = memory_store();
        let metadata = exif("Canon");

        let errors = [
            store.touch_session("ghost").await.unwrap_err(),
            store.delete_session("ghost").await.unwrap_err(),
            store
                .store_image_metadata("ghost", b"bytes", &metadata)
                .await
                .unwrap_err(),
            store.get_image_metadata("ghost", "hash").await.unwrap_err(),
            store.get_session_images("ghost").await.unwrap_err(),
            store
                .update_context("ghost", "k", json!(1))
                .await
                .unwrap_err(),
            store.get_context("ghost", "k").await.unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.code(), ErrorCode::SessionNotFound);
            assert_eq!(err.severity(), Severity::Error);
        }
    }

    #[tokio::test]
    async fn metadata_round_trips_through_store_and_get() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        let metadata = object(json!({
            "exif": {"Make": "Canon", "Model": "EOS R5", "ISO": 200},
            "xmp": {"Rating": 5},
            "keywords": ["sunset", "beach"],
            "flagged": false,
            "caption": "Golden hour",
        }));
        let hash = store
            .store_image_metadata("s1", b"raw image bytes", &metadata)
            .await
            .unwrap();
        assert_eq!(hash, content_hash(b"raw image bytes"));

        let restored = store.get_image_metadata("s1", &hash).await.unwrap();
        assert_eq!(
            restored["exif"],
            json!({"Make": "Canon", "Model": "EOS R5", "ISO": 200})
        );
        assert_eq!(restored["xmp"], json!({"Rating": 5}));
        assert_eq!(restored["keywords"], json!(["sunset", "beach"]));
        assert_eq!(restored["flagged"], json!(false));
        assert_eq!(restored["caption"], json!("Golden hour"));
    }

    #[tokio::test]
    async fn unknown_hash_is_not_in_session() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        let err = store
            .get_image_metadata("s1", "nonexistent-hash")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImageNotInSession);
    }

    #[tokio::test]
    async fn schema_gate_blocks_the_write_and_the_index() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();
        store
            .store_image_metadata("s1", b"first", &exif("Canon"))
            .await
            .unwrap();

        let err = store
            .store_image_metadata("s1", b"second", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMetadata);
        assert_eq!(err.severity(), Severity::Warning);

        // The rejected upload left no trace in the order index.
        let images = store.get_session_images("s1").await.unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn session_listing_preserves_upload_order() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        let ha = store
            .store_image_metadata("s1", b"image-a", &exif("Canon"))
            .await
            .unwrap();
        let hb = store
            .store_image_metadata("s1", b"image-b", &exif("Nikon"))
            .await
            .unwrap();
        let hc = store
            .store_image_metadata("s1", b"image-c", &exif("Sony"))
            .await
            .unwrap();

        let hashes: Vec<String> = store
            .get_session_images("s1")
            .await
            .unwrap()
            .iter()
            .map(|record| record["hash"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(hashes, vec![ha.clone(), hb.clone(), hc.clone()]);

        // Re-uploading A moves it to the end: most recent upload wins
        // position.
        store
            .store_image_metadata("s1", b"image-a", &exif("Canon"))
            .await
            .unwrap();
        let hashes: Vec<String> = store
            .get_session_images("s1")
            .await
            .unwrap()
            .iter()
            .map(|record| record["hash"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(hashes, vec![hb, hc, ha]);
    }

    #[tokio::test]
    async fn listed_records_carry_their_fields() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();
        let hash = store
            .store_image_metadata("s1", b"b1", &exif("Canon"))
            .await
            .unwrap();

        let images = store.get_session_images("s1").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["hash"], json!(hash));
        assert_eq!(images[0]["exif"]["Make"], json!("Canon"));
    }

    #[tokio::test]
    async fn identical_bytes_share_one_hash_across_sessions() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();
        store.create_session("s2").await.unwrap();

        let h1 = store
            .store_image_metadata("s1", b"shared bytes", &exif("Canon"))
            .await
            .unwrap();
        let h2 = store
            .store_image_metadata("s2", b"shared bytes", &exif("Canon"))
            .await
            .unwrap();
        assert_eq!(h1, h2);

        assert!(store.get_image_metadata("s1", &h1).await.is_ok());
        assert!(store.get_image_metadata("s2", &h1).await.is_ok());
    }

    #[tokio::test]
    async fn sessions_cannot_read_each_others_uploads() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();
        store.create_session("s2").await.unwrap();

        let hash = store
            .store_image_metadata("s1", b"private", &exif("Canon"))
            .await
            .unwrap();

        // The record exists globally, but s2 never uploaded it.
        let err = store.get_image_metadata("s2", &hash).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImageNotInSession);
        assert!(store.get_image_metadata("s1", &hash).await.is_ok());
    }

    #[tokio::test]
    async fn restoring_a_hash_replaces_the_whole_record() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        let first = object(json!({"exif": {"Make": "Canon"}, "iptc": {"City": "Oslo"}}));
        let hash = store
            .store_image_metadata("s1", b"bytes", &first)
            .await
            .unwrap();

        let second = object(json!({"exif": {"Make": "Canon", "ISO": 400}}));
        store
            .store_image_metadata("s1", b"bytes", &second)
            .await
            .unwrap();

        let restored = store.get_image_metadata("s1", &hash).await.unwrap();
        assert_eq!(restored["exif"], json!({"Make": "Canon", "ISO": 400}));
        assert!(!restored.contains_key("iptc"));
    }

    #[tokio::test]
    async fn context_slots_round_trip_and_default_to_none() {
        let (_, store) = memory_store();
        store.create_session("s1").await.unwrap();

        assert_eq!(store.get_context("s1", "history").await.unwrap(), None);

        let turns = json!([
            {"role": "user", "text": "what camera took the first image?"},
            {"role": "assistant", "text": "a Canon EOS R5"},
        ]);
        store
            .update_context("s1", "history", turns.clone())
            .await
            .unwrap();
        assert_eq!(store.get_context("s1", "history").await.unwrap(), Some(turns));

        // Overwrite wins.
        store.update_context("s1", "history", json!([])).await.unwrap();
        assert_eq!(
            store.get_context("s1", "history").await.unwrap(),
            Some(json!([]))
        );
    }

    #[tokio::test]
    async fn malformed_stored_context_surfaces_as_invalid_json() {
        let (backend, store) = memory_store();
        store.create_session("s1").await.unwrap();

        // Corrupt the slot behind the store's back.
        backend
            .submit(vec![WriteCommand::HashSet {
                key: "session:s1".to_string(),
                fields: vec![("ctx:history".to_string(), "{not json".to_string())],
            }])
            .await
            .unwrap();

        let err = store.get_context("s1", "history").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidJsonData);
    }

    #[tokio::test]
    async fn deleting_a_session_removes_its_index_but_not_shared_records() {
        let (backend, store) = memory_store();
        store.create_session("s1").await.unwrap();
        store.create_session("s2").await.unwrap();

        let hash = store
            .store_image_metadata("s1", b"shared", &exif("Canon"))
            .await
            .unwrap();
        store
            .store_image_metadata("s2", b"shared", &exif("Canon"))
            .await
            .unwrap();

        store.delete_session("s1").await.unwrap();

        let err = store.get_session_images("s1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SessionNotFound);

        // s2 still reads the shared record; reclamation is TTL-only.
        assert!(store.get_image_metadata("s2", &hash).await.is_ok());
        assert!(backend
            .key_exists(&format!("metadata:{hash}"))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_expire_without_touch() {
        let (_, store) = memory_store_with_ttl(Duration::from_secs(60));
        store.create_session("s1").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let err = store.touch_session("s1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SessionNotFound);

        // Expiry and explicit deletion are indistinguishable to callers,
        // so the id is free for reuse.
        store.create_session("s1").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn touch_extends_the_session_and_its_index() {
        let (_, store) = memory_store_with_ttl(Duration::from_secs(60));
        store.create_session("s1").await.unwrap();
        store
            .store_image_metadata("s1", b"bytes", &exif("Canon"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        store.touch_session("s1").await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        let images = store.get_session_images("s1").await.unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_records_outlive_their_session() {
        let (backend, store) = memory_store_with_ttl(Duration::from_secs(60));
        store.create_session("s1").await.unwrap();
        let hash = store
            .store_image_metadata("s1", b"bytes", &exif("Canon"))
            .await
            .unwrap();

        // Past the session TTL but inside the 2x metadata TTL.
        tokio::time::advance(Duration::from_secs(90)).await;

        let err = store.get_session_images("s1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
        assert!(backend
            .key_exists(&format!("metadata:{hash}"))
            .await
            .unwrap());

        // A later session uploading the same bytes lands on the same
        // record.
        store.create_session("s2").await.unwrap();
        let reused = store
            .store_image_metadata("s2", b"bytes", &exif("Canon"))
            .await
            .unwrap();
        assert_eq!(reused, hash);
        assert!(store.get_image_metadata("s2", &hash).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_index_entry_is_reported_not_fatal() {
        // Force the inverse skew: metadata expiring before the index.
        let backend = Arc::new(InMemoryKv::new());
        let store = SessionStore::with_config(
            backend.clone(),
            StoreConfig {
                session_ttl: Duration::from_secs(100),
                metadata_ttl: Duration::from_secs(10),
            },
        );
        store.create_session("s1").await.unwrap();
        let hash = store
            .store_image_metadata("s1", b"bytes", &exif("Canon"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;

        // Listing silently omits the expired record; point reads name it.
        let images = store.get_session_images("s1").await.unwrap();
        assert!(images.is_empty());

        let err = store.get_image_metadata("s1", &hash).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MetadataNotFound);
        assert_eq!(err.severity(), Severity::Error);
    }
}
