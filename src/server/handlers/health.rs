use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::index::VectorIndex;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "Therapy Synthesis API";

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME
    }))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let index = match state.index.current() {
        Ok(snapshot) => json!({
            "loaded": true,
            "items": snapshot.len(),
            "dimension": snapshot.dimension(),
            "fingerprint": snapshot.fingerprint(),
            "loaded_at": snapshot.loaded_at().to_rfc3339(),
            "embedding_model": snapshot.embedding_model(),
            "watching": state.is_watching_index(),
        }),
        Err(err) => json!({
            "loaded": false,
            "reason": err.to_string(),
            "watching": state.is_watching_index(),
        }),
    };

    Json(json!({
        "service": SERVICE_NAME,
        "started_at": state.started_at.to_rfc3339(),
        "index": index,
        "models": {
            "embedding": state.orchestrator.search_engine().embedder().model_name(),
            "generation": state.orchestrator.model_name(),
        }
    }))
}
