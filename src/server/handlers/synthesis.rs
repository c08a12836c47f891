use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use tokio_stream::{Stream, StreamExt};

use crate::core::cancel::CancellationToken;
use crate::core::config::defaults::example_request;
use crate::core::errors::ApiError;
use crate::server::extract::ApiJson;
use crate::state::AppState;
use crate::synthesis::{SynthesisEvent, SynthesisRequest};

pub async fn synthesis_example() -> impl IntoResponse {
    Json(example_request())
}

/// Blocking binding. Returns the complete result or the run's error.
pub async fn synthesize(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<SynthesisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.orchestrator.synthesize(request).await?;
    Ok(Json(result))
}

/// Server-sent events binding. Validation failures are rejected with 400
/// before the stream opens; anything later arrives as an `error` event.
pub async fn synthesize_stream(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<SynthesisRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Disconnect drops the stream, which closes the channel and stops the run.
    let subscription = state.orchestrator.stream(request, CancellationToken::new())?;
    let stream = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &SynthesisEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.event_name()).data(data),
        Err(err) => {
            tracing::error!("Failed to serialize {} event: {}", event.event_name(), err);
            Event::default().event("error").data(err.to_string())
        }
    }
}
