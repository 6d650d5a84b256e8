//! Persistence traits the cache and services are built against.
//!
//! The daemon plugs in a SQLite-backed implementation; tests use the
//! in-memory one below.

use crate::types::{Embedding, Identity};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    ReadFailed(String),
    #[error("store write failed: {0}")]
    WriteFailed(String),
    #[error("record for {identity} is malformed: {reason}")]
    MalformedRecord { identity: String, reason: String },
}

/// Source of enrolled descriptors.
///
/// One identity may own several rows, one per enrollment photo. `list_all`
/// must return rows in the store's record order; the cache preserves that
/// order and the matcher's tie-breaking depends on it.
pub trait DescriptorStore: Send + Sync {
    fn list_all(&self) -> Result<Vec<(Identity, Embedding)>, StoreError>;

    /// Append one descriptor row for an identity.
    fn append(&self, identity: &Identity, embedding: &Embedding) -> Result<(), StoreError>;
}

/// Outcome of recording attendance for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    /// Already recorded within the current attendance period; no new row.
    AlreadyMarked,
}

/// Sink for attendance events. Recognition itself never writes here;
/// marking is a separate, explicit step.
pub trait AttendanceSink: Send + Sync {
    fn record(&self, identity_key: &str) -> Result<MarkOutcome, StoreError>;
}

/// In-memory descriptor store. Intended for tests and small demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<(Identity, Embedding)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<(Identity, Embedding)>) -> Self {
        Self { rows: Mutex::new(rows) }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescriptorStore for MemoryStore {
    fn list_all(&self) -> Result<Vec<(Identity, Embedding)>, StoreError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    fn append(&self, identity: &Identity, embedding: &Embedding) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .push((identity.clone(), embedding.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_append_and_list() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        let ada = Identity::new("S001", "Ada");
        store.append(&ada, &Embedding::new(vec![1.0, 0.0])).unwrap();
        store.append(&ada, &Embedding::new(vec![0.9, 0.1])).unwrap();

        let rows = store.list_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, ada);
        assert_eq!(rows[0].1.values, vec![1.0, 0.0]);
        assert_eq!(rows[1].1.values, vec![0.9, 0.1]);
    }

    #[test]
    fn test_memory_store_preserves_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let id = Identity::new(format!("S{i}"), format!("person {i}"));
            store.append(&id, &Embedding::new(vec![i as f32])).unwrap();
        }
        let rows = store.list_all().unwrap();
        let keys: Vec<&str> = rows.iter().map(|(id, _)| id.key.as_str()).collect();
        assert_eq!(keys, vec!["S0", "S1", "S2", "S3", "S4"]);
    }
}
