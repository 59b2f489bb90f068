use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Header carrying the parent id of a transcription
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        // Liveness and load
        .route("/health", get(handlers::health_check))
        .route("/state", get(handlers::engine_state))
        // Transcription
        .route(
            "/v1/audio/transcriptions",
            post(handlers::create_transcription),
        )
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        // Assign an id to requests that lack one, log, and echo the id back
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
        .with_state(state)
}
