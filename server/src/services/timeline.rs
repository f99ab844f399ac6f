use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use swh_shared::{
    AppliedUpdate, LookupError, StepDirection, TimeCatalog, TimeChange, TimeEntry, TimelineEvent,
    TimelineState, format_readout, reference_hour,
};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::map::MapSurface;
use crate::overlay::{OverlayError, OverlayManager, SwapOutcome};
use crate::state::{AppState, ObservabilityCounters, PreSerializedUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    Rejected(LookupError),
    Closed,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "time change rejected: {e}"),
            Self::Closed => write!(f, "time change pipeline is not running"),
        }
    }
}

impl std::error::Error for ControlError {}

/// The time stepping starts from: last requested, or the initial selection.
#[derive(Clone, Default)]
pub struct StepCursor(Arc<Mutex<Option<TimeEntry>>>);

impl StepCursor {
    pub fn set(&self, entry: TimeEntry) {
        *self.lock() = Some(entry);
    }

    pub fn get(&self) -> Option<TimeEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TimeEntry>> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer side of the time change channel. Validates before anything is queued.
///
/// The pipeline winds down once every clone of this handle is dropped.
#[derive(Clone)]
pub struct TimeControl {
    catalog: Arc<TimeCatalog>,
    tx: mpsc::UnboundedSender<TimeChange>,
    cursor: StepCursor,
    observability: Arc<ObservabilityCounters>,
}

impl TimeControl {
    pub fn new(
        catalog: Arc<TimeCatalog>,
        observability: Arc<ObservabilityCounters>,
    ) -> (Self, mpsc::UnboundedReceiver<TimeChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Self {
            catalog,
            tx,
            cursor: StepCursor::default(),
            observability,
        };
        (control, rx)
    }

    /// Start stepping from the initially selected time.
    pub fn seed(&self, entry: TimeEntry) {
        self.cursor.set(entry);
    }

    pub fn cursor(&self) -> StepCursor {
        self.cursor.clone()
    }

    /// Queue a change to `raw`. Never blocks.
    ///
    /// The catalog's own spelling of the timestamp is what gets queued.
    pub fn request(&self, raw: &str) -> Result<TimeEntry, ControlError> {
        self.observability.record_time_change_request();
        let entry = match self.catalog.lookup(raw) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                self.observability.record_rejected_time_change();
                warn!(requested = raw, error = %e, "rejecting time change");
                return Err(ControlError::Rejected(e));
            }
        };
        self.tx
            .send(TimeChange::new(entry.raw.clone()))
            .map_err(|_| ControlError::Closed)?;
        self.cursor.set(entry.clone());
        Ok(entry)
    }

    /// Queue the neighbor of the last requested time, clamped at the catalog ends.
    pub fn step(&self, direction: StepDirection) -> Result<TimeEntry, ControlError> {
        let from = self
            .cursor
            .get()
            .or_else(|| self.catalog.last().cloned())
            .ok_or(ControlError::Rejected(LookupError::EmptyCatalog))?;
        let target = self
            .catalog
            .step(&from, direction.offset())
            .cloned()
            .ok_or_else(|| ControlError::Rejected(LookupError::NotInCatalog(from.raw.clone())))?;
        self.request(&target.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    Rejected(LookupError),
    Overlay(OverlayError),
    Superseded,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "{e}"),
            Self::Overlay(e) => write!(f, "{e}"),
            Self::Superseded => write!(f, "superseded by a newer time change"),
        }
    }
}

impl std::error::Error for ApplyError {}

/// The parts of shared state the applier writes. Carries no time change sender.
#[derive(Clone)]
pub struct TimelineSink {
    pub catalog: Arc<TimeCatalog>,
    pub timeline: Arc<RwLock<TimelineState>>,
    pub event_tx: broadcast::Sender<PreSerializedUpdate>,
    pub observability: Arc<ObservabilityCounters>,
    pub cursor: StepCursor,
}

impl TimelineSink {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            catalog: Arc::clone(&state.catalog),
            timeline: Arc::clone(&state.timeline),
            event_tx: state.event_tx.clone(),
            observability: Arc::clone(&state.observability),
            cursor: state.control.cursor(),
        }
    }
}

/// Consumer side: swaps the overlay and updates the readout for each forwarded change.
pub struct TimelineApplier<M: MapSurface> {
    state: TimelineSink,
    overlays: OverlayManager<M>,
    local_zone: Tz,
    seq: u64,
    current: Option<TimeEntry>,
}

impl<M: MapSurface> TimelineApplier<M> {
    pub fn new(state: TimelineSink, overlays: OverlayManager<M>, local_zone: Tz) -> Self {
        Self {
            state,
            overlays,
            local_zone,
            seq: 0,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&TimeEntry> {
        self.current.as_ref()
    }

    #[cfg(test)]
    pub fn overlays(&self) -> &OverlayManager<M> {
        &self.overlays
    }

    #[cfg(test)]
    pub fn overlays_mut(&mut self) -> &mut OverlayManager<M> {
        &mut self.overlays
    }

    /// Show the latest catalog time not after the current hour, or the last one.
    pub async fn initialize(&mut self, now: DateTime<Utc>) -> Option<AppliedUpdate> {
        let reference = reference_hour(now);
        let Some(entry) = self.state.catalog.select_initial(reference).cloned() else {
            warn!("time catalog is empty; no overlay will be shown");
            return None;
        };
        info!(
            reference = %reference,
            initial = %entry.raw,
            times = self.state.catalog.len(),
            "selected initial forecast time"
        );
        self.state.cursor.set(entry.clone());
        match self.apply_entry(entry).await {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %e, "initial overlay could not be shown");
                None
            }
        }
    }

    pub async fn apply(&mut self, change: &TimeChange) -> Result<AppliedUpdate, ApplyError> {
        let entry = match self.state.catalog.lookup(&change.time) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                self.state.observability.record_rejected_time_change();
                return Err(ApplyError::Rejected(e));
            }
        };
        self.apply_entry(entry).await
    }

    async fn apply_entry(&mut self, entry: TimeEntry) -> Result<AppliedUpdate, ApplyError> {
        match self.overlays.swap(&entry) {
            Ok(SwapOutcome::Installed { layer, replaced }) => {
                debug!(
                    layer,
                    ?replaced,
                    attached = self.overlays.map().attached_count(),
                    "overlay installed"
                );
            }
            Ok(SwapOutcome::Superseded) => {
                self.state.observability.record_superseded_swap();
                return Err(ApplyError::Superseded);
            }
            Err(e) => {
                self.state.observability.record_swap_failure();
                return Err(ApplyError::Overlay(e));
            }
        }

        self.seq += 1;
        let update = AppliedUpdate {
            seq: self.seq,
            time: entry.raw.clone(),
            readout: format_readout(entry.instant, self.local_zone),
            overlay_url: self
                .overlays
                .active()
                .map(|active| active.url_template.clone())
                .unwrap_or_default(),
        };
        self.current = Some(entry);
        self.publish(&update).await;
        self.state.observability.record_applied_update();
        Ok(update)
    }

    async fn publish(&self, update: &AppliedUpdate) {
        {
            let mut timeline = self.state.timeline.write().await;
            timeline.seq = update.seq;
            timeline.current = Some(update.time.clone());
            timeline.readout = Some(update.readout.clone());
            timeline.overlay_url = Some(update.overlay_url.clone());
        }
        info!(seq = update.seq, readout = %update.readout, "time readout updated");

        match serde_json::to_vec(&TimelineEvent::Update(update.clone())) {
            Ok(json) => {
                // no subscribers is fine
                let _ = self.state.event_tx.send(PreSerializedUpdate {
                    seq: update.seq,
                    json: Arc::new(Bytes::from(json)),
                });
            }
            Err(e) => warn!(seq = update.seq, error = %e, "failed to serialize applied update"),
        }
    }
}

impl<M: MapSurface + Send + 'static> TimelineApplier<M> {
    /// Apply forwarded changes in order until the channel closes, then take the
    /// overlay off the map and hand the map back.
    pub async fn run(mut self, mut rx: mpsc::Receiver<TimeChange>) -> M {
        while let Some(change) = rx.recv().await {
            if let Err(e) = self.apply(&change).await {
                warn!(
                    time = %change.time,
                    current = ?self.current().map(|entry| entry.raw.as_str()),
                    error = %e,
                    "time change not applied"
                );
            }
        }
        self.overlays.clear();
        info!("time change channel closed; applier stopped");
        self.overlays.into_map()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_stream::StreamExt;
    use tokio_stream::wrappers::BroadcastStream;

    use super::*;
    use crate::layout::LayoutRegistry;
    use crate::map::{HeadlessMap, MapOp};
    use crate::services::throttle::spawn_throttle;

    const TIMES: &str = "2024-03-01T06:00:00Z,2024-03-01T12:00:00Z,2024-03-01T18:00:00Z";

    fn at(raw: &str) -> DateTime<Utc> {
        swh_shared::catalog::parse_instant(raw).expect("fixture timestamp parses")
    }

    fn state_with(times: &str) -> (AppState, mpsc::UnboundedReceiver<TimeChange>) {
        let catalog = TimeCatalog::from_comma_separated(times).catalog;
        AppState::new(catalog, LayoutRegistry::wave_height_default())
    }

    fn applier(state: &AppState) -> TimelineApplier<HeadlessMap> {
        TimelineApplier::new(
            TimelineSink::from_state(state),
            OverlayManager::new(HeadlessMap::new(), "https://tiles.example"),
            chrono_tz::UTC,
        )
    }

    #[tokio::test]
    async fn initial_selection_then_event_swaps_once_and_updates_readout() {
        let (state, _rx) = state_with(TIMES);
        let mut applier = applier(&state);

        let initial = applier
            .initialize(at("2024-03-01T13:27:45Z"))
            .await
            .expect("initial overlay shown");
        assert_eq!(initial.time, "2024-03-01T12:00:00Z");
        assert_eq!(initial.seq, 1);
        assert_eq!(initial.readout.utc, "01/03/2024, 12:00:00 UTC");

        let ops_before = applier.overlays().map().ops().len();
        let update = applier
            .apply(&TimeChange::new("2024-03-01T18:00:00Z"))
            .await
            .expect("change applied");

        let new_ops = &applier.overlays().map().ops()[ops_before..];
        let created = new_ops
            .iter()
            .filter(|op| matches!(op, MapOp::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(applier.overlays().map().attached_count(), 1);
        assert_eq!(applier.overlays().map().peak_attached(), 1);

        assert_eq!(update.seq, 2);
        assert_eq!(update.readout.utc, "01/03/2024, 18:00:00 UTC");
        assert_eq!(
            update.overlay_url,
            "https://tiles.example/swh_contours_datetime/{z}/{x}/{y}?datetime=2024-03-01T18:00:00Z"
        );

        let timeline = state.timeline.read().await.clone();
        assert_eq!(timeline.current.as_deref(), Some("2024-03-01T18:00:00Z"));
        assert_eq!(timeline.readout, Some(update.readout));
        assert_eq!(state.observability.snapshot().applied_updates_total, 2);
    }

    #[tokio::test]
    async fn rejected_change_leaves_current_time_alone() {
        let (state, _rx) = state_with(TIMES);
        let mut applier = applier(&state);
        applier.initialize(at("2024-03-01T13:00:00Z")).await;

        let malformed = applier.apply(&TimeChange::new("soon")).await;
        assert!(matches!(
            malformed,
            Err(ApplyError::Rejected(LookupError::Malformed(_)))
        ));
        let unknown = applier
            .apply(&TimeChange::new("2024-03-01T07:00:00Z"))
            .await;
        assert!(matches!(
            unknown,
            Err(ApplyError::Rejected(LookupError::NotInCatalog(_)))
        ));

        assert_eq!(
            applier.current().map(|e| e.raw.as_str()),
            Some("2024-03-01T12:00:00Z")
        );
        assert_eq!(state.observability.snapshot().rejected_time_changes_total, 2);
        assert_eq!(state.timeline.read().await.seq, 1);
    }

    #[tokio::test]
    async fn swap_failure_keeps_previous_overlay_and_time() {
        let (state, _rx) = state_with(TIMES);
        let mut applier = applier(&state);
        applier.initialize(at("2024-03-01T13:00:00Z")).await;

        applier.overlays_mut().map_mut().set_refuse_creation(true);
        let result = applier
            .apply(&TimeChange::new("2024-03-01T18:00:00Z"))
            .await;

        assert!(matches!(result, Err(ApplyError::Overlay(_))));
        assert_eq!(
            applier.current().map(|e| e.raw.as_str()),
            Some("2024-03-01T12:00:00Z")
        );
        assert_eq!(applier.overlays().map().attached_count(), 1);
        assert_eq!(state.observability.snapshot().swap_failures_total, 1);
        assert_eq!(
            state.timeline.read().await.current.as_deref(),
            Some("2024-03-01T12:00:00Z")
        );
    }

    #[tokio::test]
    async fn empty_catalog_shows_nothing() {
        let (state, _rx) = state_with("");
        let mut applier = applier(&state);

        assert!(applier.initialize(at("2024-03-01T13:00:00Z")).await.is_none());
        assert!(applier.overlays().map().ops().is_empty());
        assert_eq!(
            state.control.request("2024-03-01T12:00:00Z"),
            Err(ControlError::Rejected(LookupError::EmptyCatalog))
        );
    }

    #[tokio::test]
    async fn initial_selection_falls_back_to_last_when_all_future() {
        let (state, _rx) = state_with(TIMES);
        let mut applier = applier(&state);
        let initial = applier
            .initialize(at("2020-01-01T00:00:00Z"))
            .await
            .expect("initial overlay shown");
        assert_eq!(initial.time, "2024-03-01T18:00:00Z");
    }

    #[test]
    fn control_queues_catalog_spelling_and_rejects_bad_input() {
        let (state, mut rx) = state_with(TIMES);

        let entry = state
            .control
            .request(" 2024-03-01T06:00:00.000Z ")
            .expect("known time accepted");
        assert_eq!(entry.raw, "2024-03-01T06:00:00Z");
        assert_eq!(
            rx.try_recv().ok(),
            Some(TimeChange::new("2024-03-01T06:00:00Z"))
        );

        assert!(matches!(
            state.control.request("2024-13-45"),
            Err(ControlError::Rejected(LookupError::Malformed(_)))
        ));
        assert!(rx.try_recv().is_err());

        let counters = state.observability.snapshot();
        assert_eq!(counters.time_change_requests_total, 2);
        assert_eq!(counters.rejected_time_changes_total, 1);
    }

    #[test]
    fn control_steps_from_last_request_and_clamps() {
        let (state, mut rx) = state_with(TIMES);
        state
            .control
            .request("2024-03-01T12:00:00Z")
            .expect("known time accepted");

        let next = state
            .control
            .step(StepDirection::Forward)
            .expect("step forward");
        assert_eq!(next.raw, "2024-03-01T18:00:00Z");
        let clamped = state
            .control
            .step(StepDirection::Forward)
            .expect("step clamps");
        assert_eq!(clamped.raw, "2024-03-01T18:00:00Z");

        let queued: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|change| change.time)
            .collect();
        assert_eq!(
            queued,
            vec![
                "2024-03-01T12:00:00Z",
                "2024-03-01T18:00:00Z",
                "2024-03-01T18:00:00Z"
            ]
        );
    }

    #[test]
    fn closed_pipeline_is_reported() {
        let (state, rx) = state_with(TIMES);
        drop(rx);
        assert_eq!(
            state.control.request("2024-03-01T12:00:00Z"),
            Err(ControlError::Closed)
        );
    }

    #[tokio::test]
    async fn dropping_every_control_drains_pipeline_and_clears_overlay() {
        let (state, control_rx) = state_with(TIMES);
        let timeline = Arc::clone(&state.timeline);
        let mut applier = applier(&state);
        applier.initialize(at("2024-03-01T13:00:00Z")).await;

        let (applied_tx, applied_rx) = mpsc::channel(8);
        let throttle = spawn_throttle(Duration::from_millis(400), control_rx, applied_tx);
        let run = tokio::spawn(applier.run(applied_rx));

        state
            .control
            .request("2024-03-01T18:00:00Z")
            .expect("known time accepted");
        drop(state);

        let map = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("applier stops once the controls are gone")
            .expect("applier task");
        tokio::time::timeout(Duration::from_secs(2), throttle)
            .await
            .expect("throttle stops once the controls are gone")
            .expect("throttle task");

        assert_eq!(map.attached_count(), 0);
        assert_eq!(map.live_layers(), 0);
        assert_eq!(
            timeline.read().await.current.as_deref(),
            Some("2024-03-01T18:00:00Z")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drag_burst_through_channels_applies_first_and_last() {
        let (state, control_rx) = state_with(TIMES);
        let mut updates = BroadcastStream::new(state.event_tx.subscribe());

        let (applied_tx, applied_rx) = mpsc::channel(8);
        spawn_throttle(Duration::from_millis(400), control_rx, applied_tx);
        tokio::spawn(applier(&state).run(applied_rx));

        for time in [
            "2024-03-01T06:00:00Z",
            "2024-03-01T12:00:00Z",
            "2024-03-01T18:00:00Z",
        ] {
            state.control.request(time).expect("known time accepted");
        }

        let mut applied = Vec::new();
        while let Ok(Some(Ok(update))) =
            tokio::time::timeout(Duration::from_secs(2), updates.next()).await
        {
            let event: serde_json::Value =
                serde_json::from_slice(&update.json).expect("update is json");
            applied.push(event["time"].as_str().unwrap_or_default().to_string());
        }

        assert_eq!(
            applied,
            vec!["2024-03-01T06:00:00Z", "2024-03-01T18:00:00Z"]
        );
        assert_eq!(
            state.timeline.read().await.current.as_deref(),
            Some("2024-03-01T18:00:00Z")
        );
    }
}
