use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::types::{Candidate, IndexedItem, KeywordFilter, KeywordMatch};
use super::VectorIndex;
use crate::core::errors::IndexError;
use crate::vector_math::rank_descending_by_cosine;

/// Immutable in-memory view of the index.
///
/// Items are kept in insertion order. A snapshot is never modified after
/// construction; rebuilding the index produces a new snapshot.
#[derive(Debug)]
pub struct IndexSnapshot {
    items: Vec<Arc<IndexedItem>>,
    by_id: HashMap<String, usize>,
    dimension: usize,
    embedding_model: Option<String>,
    fingerprint: String,
    loaded_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// Builds a snapshot, checking that every vector has the same length.
    pub fn new(
        mut items: Vec<IndexedItem>,
        embedding_model: Option<String>,
    ) -> Result<Self, IndexError> {
        items.sort_by_key(|item| item.position);

        let dimension = items.first().map(|item| item.embedding.len()).unwrap_or(0);
        let mut by_id = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if item.embedding.len() != dimension {
                return Err(IndexError::Corrupt(format!(
                    "item {} has {} dimensions, expected {}",
                    item.id,
                    item.embedding.len(),
                    dimension
                )));
            }
            if dimension > 0 && item.embedding.iter().any(|v| !v.is_finite()) {
                return Err(IndexError::Corrupt(format!(
                    "item {} has a non-finite embedding value",
                    item.id
                )));
            }
            if by_id.insert(item.id.clone(), idx).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate item id {}", item.id)));
            }
        }
        if dimension == 0 && !items.is_empty() {
            return Err(IndexError::Corrupt("items have empty embeddings".to_string()));
        }

        let fingerprint = fingerprint(&items);
        Ok(Self {
            items: items.into_iter().map(Arc::new).collect(),
            by_id,
            dimension,
            embedding_model,
            fingerprint,
            loaded_at: Utc::now(),
        })
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// SHA-256 over ids, positions and vectors.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn items(&self) -> &[Arc<IndexedItem>] {
        &self.items
    }

    /// Items tagged with any of `filter`'s keywords, in index order.
    pub fn keyword_matches(&self, filter: &KeywordFilter, limit: usize) -> Vec<KeywordMatch> {
        if filter.is_empty() {
            return Vec::new();
        }
        self.items
            .iter()
            .filter(|item| filter.matches(item))
            .take(limit)
            .map(|item| KeywordMatch {
                item: item.clone(),
                matching_keywords: filter
                    .keywords()
                    .intersection(&item.search_keywords)
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}

impl VectorIndex for IndexSnapshot {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn query(
        &self,
        vector: &[f32],
        filter: &KeywordFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>, IndexError> {
        if limit == 0 || self.items.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        // Filter first, then rank, so a narrow filter is never starved by
        // better-scoring items outside it.
        let eligible: Vec<&Arc<IndexedItem>> =
            self.items.iter().filter(|item| filter.matches(item)).collect();

        let ranked = rank_descending_by_cosine(
            vector,
            eligible.iter().map(|item| item.embedding.as_slice()),
        )?;

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(idx, score)| Candidate {
                item: eligible[idx].clone(),
                similarity_score: score,
            })
            .collect())
    }

    fn get(&self, id: &str) -> Option<Arc<IndexedItem>> {
        self.by_id.get(id).map(|&idx| self.items[idx].clone())
    }
}

fn fingerprint(items: &[IndexedItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.id.as_bytes());
        hasher.update(item.position.to_le_bytes());
        for value in &item.embedding {
            hasher.update(value.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
