use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::errors::SynthesisError;
use crate::index::{KeywordFilter, QualityTier};

pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 20;
pub const DEFAULT_TOP_K: usize = 5;

/// Request body accepted by every synthesis binding.
///
/// `user_query` defaults to empty so a missing field is reported as a
/// validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisRequest {
    #[serde(default)]
    pub user_query: String,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub quality_tiers: Option<Vec<QualityTier>>,
}

impl SynthesisRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            ..Default::default()
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Checks the request and turns it into the immutable per-call query.
    pub fn validate(self, default_top_k: usize) -> Result<QueryRequest, SynthesisError> {
        if self.user_query.trim().is_empty() {
            return Err(SynthesisError::Validation(
                "user_query must not be empty".to_string(),
            ));
        }

        let top_k = match self.top_k {
            None => default_top_k.clamp(MIN_TOP_K, MAX_TOP_K),
            Some(k) if k >= MIN_TOP_K as i64 && k <= MAX_TOP_K as i64 => k as usize,
            Some(k) => {
                return Err(SynthesisError::Validation(format!(
                    "top_k must be between {} and {}, got {}",
                    MIN_TOP_K, MAX_TOP_K, k
                )));
            }
        };

        let quality_filter = match self.quality_tiers {
            Some(tiers) if tiers.is_empty() => {
                return Err(SynthesisError::Validation(
                    "quality_tiers must name at least one tier when present".to_string(),
                ));
            }
            Some(tiers) => Some(tiers.into_iter().collect()),
            None => None,
        };

        let keywords = self.keywords.unwrap_or_default();
        Ok(QueryRequest {
            keyword_filter: KeywordFilter::new(&keywords),
            keywords,
            query_text: self.user_query,
            top_k,
            quality_filter,
        })
    }
}

/// A validated query. Created per call and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query_text: String,
    /// Caller's keywords exactly as supplied; echoed back in the result.
    pub keywords: Vec<String>,
    pub keyword_filter: KeywordFilter,
    pub top_k: usize,
    pub quality_filter: Option<BTreeSet<QualityTier>>,
}
