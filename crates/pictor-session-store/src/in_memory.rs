//! In-Memory Key-Value Backend
//!
//! Keeps every key in process memory behind an `Arc<RwLock<_>>`. Suitable
//! for:
//! - Development and testing
//! - Single-instance deployments where sessions need not survive restarts
//!
//! Per-key deadlines are measured with `tokio::time::Instant`, so tests
//! running on a paused clock can drive TTL expiry deterministically.
//! Reads treat an expired key as absent; writes purge expired keys before
//! applying their pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::{BackendError, KvBackend, WriteCommand};

#[derive(Debug, Clone)]
struct SortedEntry {
    member: String,
    score: f64,
    /// Insertion sequence, breaks ties between equal scores.
    seq: u64,
}

#[derive(Debug, Default)]
struct KvState {
    hashes: HashMap<String, HashMap<String, String>>,
    sorted: HashMap<String, Vec<SortedEntry>>,
    deadlines: HashMap<String, Instant>,
    seq: u64,
}

impl KvState {
    fn contains(&self, key: &str) -> bool {
        self.hashes.contains_key(key) || self.sorted.contains_key(key)
    }

    fn is_expired(&self, key: &str) -> bool {
        self.deadlines
            .get(key)
            .is_some_and(|deadline| *deadline <= Instant::now())
    }

    fn live_hash(&self, key: &str) -> Option<&HashMap<String, String>> {
        if self.is_expired(key) {
            return None;
        }
        self.hashes.get(key)
    }

    fn live_sorted(&self, key: &str) -> Option<&Vec<SortedEntry>> {
        if self.is_expired(key) {
            return None;
        }
        self.sorted.get(key)
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.hashes.remove(key);
            self.sorted.remove(key);
            self.deadlines.remove(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "purged expired keys");
        }
    }

    fn apply(&mut self, command: WriteCommand) {
        match command {
            WriteCommand::HashSet { key, fields } => {
                let entry = self.hashes.entry(key).or_default();
                for (field, value) in fields {
                    entry.insert(field, value);
                }
            }
            WriteCommand::SortedAdd { key, member, score } => {
                self.seq += 1;
                let entries = self.sorted.entry(key).or_default();
                if let Some(existing) = entries.iter_mut().find(|e| e.member == member) {
                    existing.score = score;
                    existing.seq = self.seq;
                } else {
                    entries.push(SortedEntry {
                        member,
                        score,
                        seq: self.seq,
                    });
                }
            }
            WriteCommand::Expire { key, ttl } => {
                if self.contains(&key) {
                    self.deadlines.insert(key, Instant::now() + ttl);
                }
            }
            WriteCommand::Delete { key } => {
                self.hashes.remove(&key);
                self.sorted.remove(&key);
                self.deadlines.remove(&key);
            }
        }
    }
}

/// In-memory implementation of [`KvBackend`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryKv {
    state: Arc<RwLock<KvState>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryKv {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn key_exists(&self, key: &str) -> Result<bool, BackendError> {
        let state = self.state.read().await;
        Ok(!state.is_expired(key) && state.contains(key))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let state = self.state.read().await;
        Ok(state.live_hash(key).and_then(|hash| hash.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        let state = self.state.read().await;
        Ok(state.live_hash(key).cloned().unwrap_or_default())
    }

    async fn hash_get_all_multi(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, BackendError> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .map(|key| state.live_hash(key).cloned().unwrap_or_default())
            .collect())
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .live_sorted(key)
            .and_then(|entries| entries.iter().find(|e| e.member == member))
            .map(|entry| entry.score))
    }

    async fn sorted_range_all(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let state = self.state.read().await;
        let Some(entries) = state.live_sorted(key) else {
            return Ok(Vec::new());
        };
        let mut ordered: Vec<&SortedEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.seq.cmp(&b.seq)));
        Ok(ordered.into_iter().map(|e| e.member.clone()).collect())
    }

    async fn submit(&self, commands: Vec<WriteCommand>) -> Result<(), BackendError> {
        // One write guard for the whole batch: at least as strong as the
        // pipeline contract callers are promised.
        let mut state = self.state.write().await;
        state.purge_expired();
        debug!(commands = commands.len(), "applying write pipeline");
        for command in commands {
            state.apply(command);
        }
        Ok(())
    }
}
