use std::fmt::Write as _;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use swh_shared::style::LEGEND_TITLE;
use swh_shared::{LookupError, StepDirection, TimeEntry, legend_entries, resolve_style};

use crate::services::timeline::ControlError;
use crate::state::{AppState, ObservabilitySnapshot};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct TimeChangeRequest {
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub direction: StepDirection,
}

#[derive(Debug, Deserialize)]
pub struct StyleQuery {
    pub value: f64,
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (seq, current) = {
        let timeline = state.timeline.read().await;
        (timeline.seq, timeline.current.clone())
    };
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "times": state.catalog.len(),
        "current": current,
        "seq": seq,
        "observability": {
            "time_change_requests_total": observability.time_change_requests_total,
            "rejected_time_changes_total": observability.rejected_time_changes_total,
            "applied_updates_total": observability.applied_updates_total,
            "swap_failures_total": observability.swap_failures_total,
            "superseded_swaps_total": observability.superseded_swaps_total,
        }
    }))
}

pub async fn get_timeline(State(state): State<AppState>) -> impl IntoResponse {
    let timeline = state.timeline.read().await.clone();
    ([(header::CACHE_CONTROL, "no-store")], Json(timeline))
}

/// Queue a time change. Acceptance means queued, not yet shown.
pub async fn post_time(
    State(state): State<AppState>,
    Json(request): Json<TimeChangeRequest>,
) -> Response {
    accepted_or_error(state.control.request(&request.time))
}

pub async fn post_step(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Response {
    accepted_or_error(state.control.step(request.direction))
}

pub async fn get_legend() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(serde_json::json!({
            "title": LEGEND_TITLE,
            "entries": legend_entries(),
        })),
    )
}

pub async fn get_style(Query(query): Query<StyleQuery>) -> impl IntoResponse {
    Json(resolve_style(query.value))
}

pub async fn get_layout(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.layout.as_ref().clone())
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let seq = state.timeline.read().await.seq;
    let observability = state.observability.snapshot();
    let body = render_prometheus_metrics(state.catalog.len(), seq, observability);

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn accepted_or_error(result: Result<TimeEntry, ControlError>) -> Response {
    match result {
        Ok(entry) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "queued": entry.raw })),
        )
            .into_response(),
        Err(e) => (
            control_error_status(&e),
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn control_error_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::Rejected(LookupError::Malformed(_)) => StatusCode::BAD_REQUEST,
        ControlError::Rejected(LookupError::NotInCatalog(_)) => StatusCode::NOT_FOUND,
        ControlError::Rejected(LookupError::EmptyCatalog) | ControlError::Closed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn render_prometheus_metrics(
    catalog_size: usize,
    seq: u64,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "# HELP swh_catalog_times Number of forecast times in the catalog."
    );
    let _ = writeln!(body, "# TYPE swh_catalog_times gauge");
    let _ = writeln!(body, "swh_catalog_times {catalog_size}");

    let _ = writeln!(
        body,
        "# HELP swh_applied_seq Sequence number of the most recently applied time change."
    );
    let _ = writeln!(body, "# TYPE swh_applied_seq gauge");
    let _ = writeln!(body, "swh_applied_seq {seq}");

    write_counter(
        &mut body,
        "swh_time_change_requests_total",
        "Total time changes requested through the control surface.",
        observability.time_change_requests_total,
    );
    write_counter(
        &mut body,
        "swh_rejected_time_changes_total",
        "Total time changes rejected as malformed or outside the catalog.",
        observability.rejected_time_changes_total,
    );
    write_counter(
        &mut body,
        "swh_applied_updates_total",
        "Total time changes applied to the map.",
        observability.applied_updates_total,
    );
    write_counter(
        &mut body,
        "swh_swap_failures_total",
        "Total overlay swaps that failed to build a layer.",
        observability.swap_failures_total,
    );
    write_counter(
        &mut body,
        "swh_superseded_swaps_total",
        "Total overlay layers discarded because a newer swap started.",
        observability.superseded_swaps_total,
    );

    body
}

fn write_counter(body: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(body, "# HELP {name} {help}");
    let _ = writeln!(body, "# TYPE {name} counter");
    let _ = writeln!(body, "{name} {value}");
}
