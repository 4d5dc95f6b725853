//! Audit Store
//!
//! Contract for the external record store the engines persist to (variant
//! statistics, evolution results, improvement proofs) plus an in-memory
//! implementation used by tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;

/// Trait for audit store backends
///
/// Writes are best-effort from the caller's point of view: every engine logs
/// a failed `put` and carries on with its in-memory result.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Fetch the record stored under `key` for `pod`
    async fn get(&self, pod: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or overwrite the record under `key` for `pod`
    async fn put(&self, pod: &str, key: &str, record: Value, metadata: Value) -> Result<(), StoreError>;

    /// Approximate recall: records relevant to `query`, most recent first
    async fn query_recent(&self, pod: &str, query: &str, top_k: usize) -> Result<Vec<Value>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Value,
    metadata: Value,
    seq: u64,
}

/// In-memory audit store
///
/// Uses DashMap for concurrent access. `query_recent` matches records whose
/// key contains the query text (an empty query matches everything) and
/// orders them by write recency.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: DashMap<(String, String), StoredRecord>,
    seq: AtomicU64,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all pods
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Metadata written alongside a record
    pub fn metadata(&self, pod: &str, key: &str) -> Option<Value> {
        self.records
            .get(&(pod.to_string(), key.to_string()))
            .map(|r| r.metadata.clone())
    }

    /// All keys stored for a pod, unordered
    pub fn keys(&self, pod: &str) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == pod)
            .map(|entry| entry.key().1.clone())
            .collect()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn get(&self, pod: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .records
            .get(&(pod.to_string(), key.to_string()))
            .map(|r| r.record.clone()))
    }

    async fn put(&self, pod: &str, key: &str, record: Value, metadata: Value) -> Result<(), StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.records.insert(
            (pod.to_string(), key.to_string()),
            StoredRecord {
                record,
                metadata,
                seq,
            },
        );
        Ok(())
    }

    async fn query_recent(&self, pod: &str, query: &str, top_k: usize) -> Result<Vec<Value>, StoreError> {
        let mut hits: Vec<(u64, Value)> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == pod && entry.key().1.contains(query))
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();

        hits.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(hits.into_iter().take(top_k).map(|(_, record)| record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get() {
        let store = InMemoryAuditStore::new();
        store
            .put("aurora", "variant:opener:0000aa", json!({"calls": 1}), json!({}))
            .await
            .unwrap();

        let record = store.get("aurora", "variant:opener:0000aa").await.unwrap();
        assert_eq!(record, Some(json!({"calls": 1})));
        assert_eq!(store.get("janus", "variant:opener:0000aa").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_recent_orders_newest_first() {
        let store = InMemoryAuditStore::new();
        for i in 0..5 {
            store
                .put("aurora", &format!("proof:cycle-{}", i), json!({"i": i}), json!({}))
                .await
                .unwrap();
        }
        store
            .put("aurora", "variant:opener:000001", json!({"i": 99}), json!({}))
            .await
            .unwrap();

        let hits = store.query_recent("aurora", "proof:", 3).await.unwrap();
        assert_eq!(hits, vec![json!({"i": 4}), json!({"i": 3}), json!({"i": 2})]);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_record() {
        let store = InMemoryAuditStore::new();
        store.put("dan", "k", json!(1), json!({"type": "a"})).await.unwrap();
        store.put("dan", "k", json!(2), json!({"type": "b"})).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("dan", "k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.metadata("dan", "k"), Some(json!({"type": "b"})));
    }
}
