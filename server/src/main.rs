mod app;
mod config;
mod layout;
mod map;
mod overlay;
mod routes;
mod services;
mod state;

use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::layout::LayoutRegistry;
use crate::map::{HeadlessMap, MapSurface};
use crate::overlay::{OverlayManager, log_feature_click};
use crate::services::timeline::{TimelineApplier, TimelineSink};
use crate::state::AppState;

const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mvt_url = match config::required_url(config::MVT_URL_ENV) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("{e}");
            return;
        }
    };
    let capabilities_url = match config::required_url(config::CAPABILITIES_URL_ENV) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("{e}");
            return;
        }
    };

    let http_client = match services::capabilities::build_http_client() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return;
        }
    };
    let catalog =
        services::capabilities::fetch_time_catalog(&http_client, &capabilities_url).await;

    let layout = LayoutRegistry::wave_height_default();
    for region in layout.regions().iter().filter(|r| !r.controls.is_empty()) {
        let controls: Vec<&str> = region.controls.iter().map(|c| c.id.as_str()).collect();
        tracing::debug!(region = ?region.region, ?controls, "docked controls");
    }
    let (state, control_rx) = AppState::new(catalog, layout);

    let local_zone = config::local_timezone();
    let overlays =
        OverlayManager::new(HeadlessMap::new(), mvt_url).with_click_handler(log_feature_click());
    let sink = TimelineSink::from_state(&state);
    let mut applier = TimelineApplier::new(sink, overlays, local_zone);
    applier.initialize(chrono::Utc::now()).await;

    // control -> throttle -> applier
    let (applied_tx, applied_rx) = mpsc::channel(config::applied_channel_capacity());
    let throttle_interval = config::throttle_interval();
    tracing::info!(
        interval_ms = throttle_interval.as_millis() as u64,
        %local_zone,
        "starting time change pipeline"
    );
    services::throttle::spawn_throttle(throttle_interval, control_rx, applied_tx);
    let applier_task = tokio::spawn(applier.run(applied_rx));

    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!("Wave height overlay server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    // The router held the last TimeControl; the throttle and applier now drain.
    match tokio::time::timeout(PIPELINE_DRAIN_TIMEOUT, applier_task).await {
        Ok(Ok(map)) => {
            tracing::info!(attached = map.attached_count(), "overlay pipeline stopped");
        }
        Ok(Err(e)) => tracing::error!(error = %e, "applier task failed"),
        Err(_) => tracing::warn!("overlay pipeline did not stop in time"),
    }

    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
