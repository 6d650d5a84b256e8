//! In-memory descriptor cache with atomic snapshot publication.
//!
//! The cache rebuilds wholesale from the descriptor store and swaps the
//! result in as a single immutable snapshot. Readers clone an `Arc` to the
//! current snapshot and are never blocked by a concurrent rebuild; a failed
//! rebuild leaves the previous snapshot in place.

use crate::store::{DescriptorStore, StoreError};
use crate::types::{Embedding, Identity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("descriptor store read failed: {0}")]
    StoreRead(StoreError),
    #[error("descriptor record for {identity} is malformed: {reason}")]
    MalformedRecord { identity: String, reason: String },
}

/// One identity together with all of its enrolled descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorRecord {
    pub identity: Identity,
    pub embeddings: Vec<Embedding>,
}

/// Immutable view of the whole gallery at one point in time.
///
/// Records appear in store record order, grouped by identity at the
/// position of the identity's first row. That order drives the matcher's
/// tie-breaking and is stable within one snapshot only; it may shift
/// between refreshes as the store changes. Version 0 marks the
/// placeholder installed before the first successful refresh.
#[derive(Debug)]
pub struct Snapshot {
    version: u64,
    dim: usize,
    records: Vec<DescriptorRecord>,
}

impl Snapshot {
    /// Placeholder snapshot for a cache that has never been loaded.
    pub fn never_loaded(dim: usize) -> Self {
        Self { version: 0, dim, records: Vec::new() }
    }

    /// Build a snapshot directly from records. The cache builds its own;
    /// this is for callers that assemble a fixed gallery by hand.
    pub fn new(version: u64, dim: usize, records: Vec<DescriptorRecord>) -> Self {
        Self { version, dim, records }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Expected descriptor dimensionality, fixed even while empty.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// False until the first successful refresh has been published.
    pub fn is_loaded(&self) -> bool {
        self.version > 0
    }

    /// Total descriptor count across all identities.
    pub fn embedding_count(&self) -> usize {
        self.records.iter().map(|r| r.embeddings.len()).sum()
    }

    pub fn records(&self) -> &[DescriptorRecord] {
        &self.records
    }
}

/// Shared descriptor cache.
///
/// `refresh` rebuilds from the store; `snapshot` hands out the currently
/// published view. Refreshes may race: each claims a version number before
/// reading the store, and only a strictly newer snapshot is installed, so
/// a slow rebuild can never clobber a fresher one.
pub struct DescriptorCache {
    store: Arc<dyn DescriptorStore>,
    dim: usize,
    current: RwLock<Arc<Snapshot>>,
    next_version: AtomicU64,
}

impl DescriptorCache {
    pub fn new(store: Arc<dyn DescriptorStore>, dim: usize) -> Self {
        Self {
            store,
            dim,
            current: RwLock::new(Arc::new(Snapshot::never_loaded(dim))),
            next_version: AtomicU64::new(1),
        }
    }

    /// Expected descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The currently published snapshot. Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().unwrap().clone()
    }

    /// Rebuild from the store and publish the result.
    ///
    /// On any failure the previous snapshot stays published and the error
    /// is returned. A refresh that lost the race to a newer one is not an
    /// error; its result is discarded and `Ok` is returned.
    pub fn refresh(&self) -> Result<(), CacheError> {
        // Claim the version before reading the store, so two racing
        // refreshes resolve by which one saw the store later.
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);

        let rows = match self.store.list_all() {
            Ok(rows) => rows,
            Err(StoreError::MalformedRecord { identity, reason }) => {
                return Err(CacheError::MalformedRecord { identity, reason })
            }
            Err(err) => return Err(CacheError::StoreRead(err)),
        };

        let snapshot = group_rows(version, self.dim, rows)?;
        let identities = snapshot.len();
        let embeddings = snapshot.embedding_count();

        let mut current = self.current.write().unwrap();
        if snapshot.version() > current.version() {
            *current = Arc::new(snapshot);
            tracing::debug!(version, identities, embeddings, "descriptor cache refreshed");
        } else {
            tracing::debug!(
                claimed = version,
                installed = current.version(),
                "discarding refresh result older than installed snapshot"
            );
        }

        Ok(())
    }
}

/// Group store rows into per-identity records, preserving row order.
///
/// An identity's record sits where its first row appeared; later rows for
/// the same key append to it. When rows disagree on the display name the
/// first one wins.
fn group_rows(
    version: u64,
    dim: usize,
    rows: Vec<(Identity, Embedding)>,
) -> Result<Snapshot, CacheError> {
    let mut records: Vec<DescriptorRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (identity, embedding) in rows {
        if embedding.dim() != dim {
            return Err(CacheError::MalformedRecord {
                identity: identity.key,
                reason: format!("expected {dim} components, got {}", embedding.dim()),
            });
        }

        match index.get(&identity.key) {
            Some(&at) => records[at].embeddings.push(embedding),
            None => {
                index.insert(identity.key.clone(), records.len());
                records.push(DescriptorRecord { identity, embeddings: vec![embedding] });
            }
        }
    }

    Ok(Snapshot { version, dim, records })
}
