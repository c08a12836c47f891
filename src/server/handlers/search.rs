use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::cancel::CancellationToken;
use crate::core::errors::ApiError;
use crate::server::extract::ApiJson;
use crate::synthesis::{ExampleMetadata, SimilarExample, SynthesisRequest};
use crate::state::AppState;

const DEFAULT_KEYWORD_LIMIT: usize = 20;
const MAX_KEYWORD_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub keywords: Option<Vec<String>>,
    pub top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct KeywordSearchRequest {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub limit: Option<usize>,
}

/// Ranked similar examples for a query, without synthesis.
pub async fn search(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = SynthesisRequest {
        user_query: payload.query,
        keywords: payload.keywords,
        top_k: payload.top_k,
        quality_tiers: None,
    };
    let query = state.orchestrator.prepare(request)?;

    // Dropped with the handler future when the client goes away.
    let cancel = CancellationToken::new();
    let _guard = cancel.drop_guard();
    let candidates = state
        .orchestrator
        .search_engine()
        .search(&query, &cancel)
        .await?;

    let results: Vec<SimilarExample> = candidates.iter().map(SimilarExample::from).collect();
    Ok(Json(json!({
        "query": query.query_text,
        "keywords": query.keywords,
        "count": results.len(),
        "results": results,
    })))
}

/// Items tagged with any of the keywords, in index order.
pub async fn search_keywords(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<KeywordSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let keywords: Vec<String> = payload
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(ApiError::BadRequest("keywords cannot be empty".to_string()));
    }
    let limit = payload
        .limit
        .unwrap_or(DEFAULT_KEYWORD_LIMIT)
        .clamp(1, MAX_KEYWORD_LIMIT);

    let matches = state
        .orchestrator
        .search_engine()
        .search_by_keywords(&keywords, limit)?;

    let results: Vec<_> = matches
        .iter()
        .map(|m| {
            let metadata = ExampleMetadata {
                search_keywords: m.item.search_keywords.iter().cloned().collect(),
                quality_buckets: m.item.quality_buckets.clone(),
                extra: m.item.extra.clone(),
            };
            json!({
                "id": m.item.id,
                "prompt": m.item.raw_text,
                "matching_keywords": m.matching_keywords,
                "metadata": metadata,
            })
        })
        .collect();

    Ok(Json(json!({
        "keywords": keywords,
        "count": results.len(),
        "results": results,
    })))
}
