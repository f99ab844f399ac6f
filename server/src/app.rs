use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::api::health))
        .route("/api/metrics", get(routes::api::metrics))
        .route("/api/timeline", get(routes::api::get_timeline))
        .route("/api/time", post(routes::api::post_time))
        .route("/api/time/step", post(routes::api::post_step))
        .route("/api/legend", get(routes::api::get_legend))
        .route("/api/style", get(routes::api::get_style))
        .route("/api/layout", get(routes::api::get_layout))
        .route("/api/events", get(routes::sse::timeline_events))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
