use axum::extract::State;
use axum::http::{StatusCode, header::CONTENT_TYPE};
use axum::response::IntoResponse;

use crate::types::AppState;

pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus_handle.run_upkeep();
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus_handle.render(),
    )
}
