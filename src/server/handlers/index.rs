use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::index::VectorIndex;
use crate::state::AppState;

/// Reloads the durable index and swaps it in. The previous snapshot keeps
/// serving if the reload fails.
pub async fn reload_index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let previous = state.index.current().ok().map(|s| s.fingerprint().to_string());
    let snapshot = state.index.reload().await.map_err(|err| {
        tracing::warn!("Index reload failed: {}", err);
        ApiError::from(err)
    })?;

    Ok(Json(json!({
        "status": "reloaded",
        "items": snapshot.len(),
        "dimension": snapshot.dimension(),
        "fingerprint": snapshot.fingerprint(),
        "changed": previous.as_deref() != Some(snapshot.fingerprint()),
    })))
}
