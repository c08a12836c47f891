//! Vector index over historical patient/therapist exchanges.
//!
//! - `IndexSnapshot`: immutable in-memory view used for queries
//! - `IndexStore` / `SqliteIndexStore`: durable storage the snapshot is loaded from
//! - `IndexHandle`: swappable reference to the current snapshot
//! - `ingest`: builds the durable store from a tabular corpus

mod handle;
pub mod ingest;
mod snapshot;
mod sqlite;
mod store;
mod types;

use std::sync::Arc;

use crate::core::errors::IndexError;

pub use handle::IndexHandle;
pub use snapshot::IndexSnapshot;
pub use sqlite::SqliteIndexStore;
pub use store::IndexStore;
pub use types::{
    Candidate, IndexedItem, KeywordFilter, KeywordMatch, QualityBuckets, QualityTier,
};

/// Read-only nearest-neighbour lookup.
pub trait VectorIndex: Send + Sync {
    /// Length of every stored vector; zero for an empty index.
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `limit` items passing `filter`, best match first.
    fn query(
        &self,
        vector: &[f32],
        filter: &KeywordFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>, IndexError>;

    fn get(&self, id: &str) -> Option<Arc<IndexedItem>>;
}
