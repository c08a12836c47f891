//! Similarity search over the current index snapshot.

use std::sync::Arc;

use crate::core::cancel::CancellationToken;
use crate::core::errors::{IndexError, ProviderError, SynthesisError};
use crate::core::retry::{RetryError, RetryPolicy};
use crate::embedding::EmbeddingProvider;
use crate::index::{Candidate, IndexHandle, KeywordFilter, KeywordMatch, VectorIndex};
use crate::synthesis::request::QueryRequest;

#[derive(Clone)]
pub struct SimilaritySearchEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: IndexHandle,
    retry: RetryPolicy,
}

impl SimilaritySearchEngine {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: IndexHandle, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            index,
            retry,
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embeds the query and returns up to `top_k` candidates passing the
    /// keyword filter, best first.
    ///
    /// The snapshot is taken once up front, so a concurrent reload does not
    /// affect this call.
    pub async fn search(
        &self,
        query: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, SynthesisError> {
        let snapshot = self.index.current()?;

        let embedder = &self.embedder;
        let text = query.query_text.as_str();
        let vector = self
            .retry
            .run("query embedding", cancel, |_| embedder.embed(text))
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => SynthesisError::Cancelled,
                RetryError::Failed { source, .. } => SynthesisError::EmbeddingUnavailable(source),
            })?;

        if !snapshot.is_empty() && vector.len() != snapshot.dimension() {
            return Err(SynthesisError::EmbeddingUnavailable(ProviderError::Malformed(
                format!(
                    "query embedding has {} dimensions, index expects {}",
                    vector.len(),
                    snapshot.dimension()
                ),
            )));
        }

        let candidates = snapshot.query(&vector, &query.keyword_filter, query.top_k)?;
        tracing::debug!(
            "Search returned {} candidate(s) for top_k={} (filter: {:?})",
            candidates.len(),
            query.top_k,
            query.keyword_filter.keywords()
        );
        Ok(candidates)
    }

    /// Items carrying any of `keywords`, in index order, without ranking.
    pub fn search_by_keywords(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordMatch>, IndexError> {
        let snapshot = self.index.current()?;
        Ok(snapshot.keyword_matches(&KeywordFilter::new(keywords), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::Backoff;
    use crate::index::{IndexSnapshot, IndexedItem, QualityBuckets};
    use crate::synthesis::request::SynthesisRequest;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Unreachable("connection refused".into()))
            } else {
                Ok(self.vector.clone())
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn embedder(vector: Vec<f32>, fail: bool) -> Arc<FixedEmbedder> {
        Arc::new(FixedEmbedder {
            vector,
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn item(id: &str, position: u64, embedding: Vec<f32>, keywords: &[&str]) -> IndexedItem {
        IndexedItem {
            id: id.to_string(),
            position,
            raw_text: format!("prompt {id}"),
            embedding,
            search_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            quality_buckets: QualityBuckets::default(),
            extra: Map::new(),
        }
    }

    fn handle() -> IndexHandle {
        IndexHandle::new(
            IndexSnapshot::new(
                vec![
                    item("a", 0, vec![1.0, 0.0], &["Sleep"]),
                    item("b", 1, vec![0.9, 0.1], &["Anxiety"]),
                    item("c", 2, vec![0.5, 0.5], &[]),
                    item("d", 3, vec![0.0, 1.0], &["Anxiety", "Grief"]),
                ],
                Some("fixed".into()),
            )
            .unwrap(),
        )
    }

    fn retry() -> RetryPolicy {
        RetryPolicy::new(3, Backoff::Fixed, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn returns_top_k_descending() {
        let engine = SimilaritySearchEngine::new(embedder(vec![1.0, 0.0], false), handle(), retry());
        let query = SynthesisRequest::new("I can't sleep").with_top_k(3).validate(5).unwrap();

        let results = engine.search(&query, &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = results.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score));
        assert!(results
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.similarity_score)));
    }

    #[tokio::test]
    async fn keyword_filter_limits_results() {
        let engine = SimilaritySearchEngine::new(embedder(vec![1.0, 0.0], false), handle(), retry());
        let query = SynthesisRequest::new("worried")
            .with_keywords(["Anxiety"])
            .with_top_k(5)
            .validate(5)
            .unwrap();

        let results = engine.search(&query, &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = results.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn provider_failure_is_embedding_unavailable_after_retries() {
        let fake = embedder(vec![], true);
        let engine = SimilaritySearchEngine::new(fake.clone(), handle(), retry());
        let query = SynthesisRequest::new("hello").validate(5).unwrap();

        let err = engine.search(&query, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::EmbeddingUnavailable(_)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wrong_dimension_is_embedding_unavailable() {
        let engine =
            SimilaritySearchEngine::new(embedder(vec![1.0, 0.0, 0.0], false), handle(), retry());
        let query = SynthesisRequest::new("hello").validate(5).unwrap();

        let err = engine.search(&query, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::EmbeddingUnavailable(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn missing_index_is_an_index_error() {
        let fake = embedder(vec![1.0, 0.0], false);
        let engine = SimilaritySearchEngine::new(fake.clone(), IndexHandle::unloaded(), retry());
        let query = SynthesisRequest::new("hello").validate(5).unwrap();

        let err = engine.search(&query, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Index(IndexError::Missing(_))));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_index_returns_no_candidates() {
        let engine = SimilaritySearchEngine::new(
            embedder(vec![1.0, 0.0], false),
            IndexHandle::new(IndexSnapshot::new(vec![], None).unwrap()),
            retry(),
        );
        let query = SynthesisRequest::new("hello").validate(5).unwrap();

        let results = engine.search(&query, &CancellationToken::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn cancelled_search_reports_cancellation() {
        let engine = SimilaritySearchEngine::new(embedder(vec![1.0, 0.0], false), handle(), retry());
        let query = SynthesisRequest::new("hello").validate(5).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.search(&query, &cancel).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Cancelled));
    }

    #[test]
    fn keyword_lookup_lists_matches_in_index_order() {
        let engine = SimilaritySearchEngine::new(embedder(vec![1.0, 0.0], false), handle(), retry());
        let matches = engine
            .search_by_keywords(&["Grief".to_string(), "Anxiety".to_string()], 10)
            .unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.item.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
        assert_eq!(matches[1].matching_keywords, vec!["Anxiety", "Grief"]);
    }
}
