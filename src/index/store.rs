//! Durable backing for the vector index.
//!
//! The query path never talks to the store directly: a store is read once
//! into an `IndexSnapshot`, and the snapshot serves searches.

use async_trait::async_trait;

use super::snapshot::IndexSnapshot;
use super::types::IndexedItem;
use crate::core::errors::IndexError;

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Short description for logs and status output.
    fn describe(&self) -> String;

    /// Read every item into a fresh snapshot.
    async fn load_snapshot(&self) -> Result<IndexSnapshot, IndexError>;

    /// Replace the stored contents with `items`, recording the embedding model.
    async fn replace_all(
        &self,
        items: Vec<IndexedItem>,
        embedding_model: &str,
    ) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}
