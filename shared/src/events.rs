use serde::{Deserialize, Serialize};

use crate::time_format::TimeReadout;

/// A candidate timestamp emitted by the time control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeChange {
    pub time: String,
}

impl TimeChange {
    pub fn new(time: impl Into<String>) -> Self {
        Self { time: time.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    Forward,
    Backward,
}

impl StepDirection {
    pub fn offset(self) -> isize {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

/// Record of one time change that made it onto the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedUpdate {
    pub seq: u64,
    pub time: String,
    pub readout: TimeReadout,
    pub overlay_url: String,
}

/// Read-only view of the synchronized timeline state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineState {
    pub seq: u64,
    pub times: Vec<String>,
    pub current: Option<String>,
    pub readout: Option<TimeReadout>,
    pub overlay_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TimelineEvent {
    Snapshot(TimelineState),
    Update(AppliedUpdate),
}
