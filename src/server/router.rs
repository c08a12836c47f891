use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{health, index, search, synthesis};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the application router with all routes and middleware.
///
/// * `state` - Shared application state
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_allowed_origins);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route("/synthesis-example", get(synthesis::synthesis_example))
        .route("/synthesize-therapy-response", post(synthesis::synthesize))
        .route(
            "/synthesize-therapy-response/stream",
            post(synthesis::synthesize_stream),
        )
        .route("/api/search", post(search::search))
        .route("/api/search/keywords", post(search::search_keywords))
        .route("/api/index/reload", post(index::reload_index))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let allowed_origins = resolve_allowed_origins(configured)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn resolve_allowed_origins(configured: &[String]) -> Vec<String> {
    configured
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}
