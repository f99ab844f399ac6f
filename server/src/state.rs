use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use swh_shared::{TimeCatalog, TimeChange, TimelineEvent, TimelineState};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::warn;

use crate::config::sse_broadcast_buffer;
use crate::layout::LayoutRegistry;
use crate::services::timeline::TimeControl;

/// Pre-serialized SSE event, serialized once by the applier and shared by all clients.
#[derive(Debug, Clone)]
pub struct PreSerializedUpdate {
    pub seq: u64,
    pub json: Arc<Bytes>,
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<TimeCatalog>,
    /// Written only by the timeline applier.
    pub timeline: Arc<RwLock<TimelineState>>,
    pub event_tx: broadcast::Sender<PreSerializedUpdate>,
    pub control: TimeControl,
    pub layout: Arc<LayoutRegistry>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    time_change_requests_total: AtomicU64,
    rejected_time_changes_total: AtomicU64,
    applied_updates_total: AtomicU64,
    swap_failures_total: AtomicU64,
    superseded_swaps_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub time_change_requests_total: u64,
    pub rejected_time_changes_total: u64,
    pub applied_updates_total: u64,
    pub swap_failures_total: u64,
    pub superseded_swaps_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            time_change_requests_total: self.time_change_requests_total.load(Ordering::Relaxed),
            rejected_time_changes_total: self
                .rejected_time_changes_total
                .load(Ordering::Relaxed),
            applied_updates_total: self.applied_updates_total.load(Ordering::Relaxed),
            swap_failures_total: self.swap_failures_total.load(Ordering::Relaxed),
            superseded_swaps_total: self.superseded_swaps_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_time_change_request(&self) {
        self.time_change_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_time_change(&self) {
        self.rejected_time_changes_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied_update(&self) {
        self.applied_updates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swap_failure(&self) {
        self.swap_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded_swap(&self) {
        self.superseded_swaps_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl AppState {
    /// Build shared state around a fetched catalog.
    ///
    /// Returns the receiving end of the time control channel, which feeds the throttle.
    pub fn new(
        catalog: TimeCatalog,
        layout: LayoutRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<TimeChange>) {
        let catalog = Arc::new(catalog);
        let observability = Arc::new(ObservabilityCounters::default());
        let (control, control_rx) =
            TimeControl::new(Arc::clone(&catalog), Arc::clone(&observability));
        let (event_tx, _) = broadcast::channel(sse_broadcast_buffer());
        let timeline = TimelineState {
            times: catalog.raw_values(),
            ..TimelineState::default()
        };

        let state = Self {
            catalog,
            timeline: Arc::new(RwLock::new(timeline)),
            event_tx,
            control,
            layout: Arc::new(layout),
            observability,
        };
        (state, control_rx)
    }

    /// Serialize the current timeline as an SSE snapshot payload.
    pub async fn snapshot_json(&self) -> Option<(u64, String)> {
        let timeline = self.timeline.read().await.clone();
        let seq = timeline.seq;
        match serde_json::to_string(&TimelineEvent::Snapshot(timeline)) {
            Ok(json) => Some((seq, json)),
            Err(e) => {
                warn!(error = %e, "failed to serialize timeline snapshot");
                None
            }
        }
    }
}
