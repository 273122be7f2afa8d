pub mod metrics;
pub mod submit;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::types::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/problems/{id}/submit", post(submit::submit_solution_endpoint))
        .route("/metrics", get(metrics::metrics_endpoint))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}
