use std::fmt;
use std::sync::Arc;

use swh_shared::TimeEntry;
use swh_shared::style::style_for_properties;
use tracing::{debug, info};

use crate::config::{OVERLAY_COLLECTION, OVERLAY_MAX_DETAIL_ZOOM, OVERLAY_MIN_DETAIL_ZOOM};
use crate::map::{FeatureClickHandler, FeatureProperties, LayerId, MapSurface, OverlaySpec};

/// The overlay currently on the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveOverlay {
    pub layer: LayerId,
    pub time: String,
    pub url_template: String,
}

/// A built but not yet attached layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOverlay {
    pub layer: LayerId,
    pub time: String,
    pub url_template: String,
}

/// Issued when a swap starts; only the newest ticket may install its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapTicket {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Installed {
        layer: LayerId,
        replaced: Option<LayerId>,
    },
    /// A newer swap started while this one was being built; the layer was released.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    InvalidSource(String),
    Construction(String),
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSource(reason) => write!(f, "invalid overlay source: {reason}"),
            Self::Construction(reason) => write!(f, "overlay construction failed: {reason}"),
        }
    }
}

impl std::error::Error for OverlayError {}

/// Tile URL template for one forecast time. The timestamp is substituted verbatim.
pub fn overlay_spec(base_url: &str, time: &str) -> Result<OverlaySpec, OverlayError> {
    let base = base_url.trim_end_matches('/');
    let parsed = reqwest::Url::parse(base)
        .map_err(|e| OverlayError::InvalidSource(format!("{base:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(OverlayError::InvalidSource(format!(
            "{base:?} is not an http(s) URL"
        )));
    }
    if time.is_empty() || time.chars().any(char::is_whitespace) {
        return Err(OverlayError::InvalidSource(format!(
            "unusable datetime {time:?}"
        )));
    }
    Ok(OverlaySpec {
        url_template: format!("{base}/{OVERLAY_COLLECTION}/{{z}}/{{x}}/{{y}}?datetime={time}"),
        time: time.to_string(),
        min_detail_zoom: OVERLAY_MIN_DETAIL_ZOOM,
        max_detail_zoom: OVERLAY_MAX_DETAIL_ZOOM,
        style: style_for_properties,
    })
}

/// Logs the clicked feature with the fill it is drawn with.
pub fn log_feature_click() -> FeatureClickHandler {
    Arc::new(|layer: LayerId, properties: &FeatureProperties| {
        let fill = style_for_properties(properties).fill_color;
        debug!(
            layer,
            fill = %fill,
            properties = %serde_json::Value::Object(properties.clone()),
            "overlay feature clicked"
        );
    })
}

/// Sole owner of the active overlay slot.
pub struct OverlayManager<M: MapSurface> {
    map: M,
    base_url: String,
    click_handler: FeatureClickHandler,
    active: Option<ActiveOverlay>,
    generation: u64,
}

impl<M: MapSurface> OverlayManager<M> {
    pub fn new(map: M, base_url: impl Into<String>) -> Self {
        Self {
            map,
            base_url: base_url.into(),
            click_handler: log_feature_click(),
            active: None,
            generation: 0,
        }
    }

    pub fn with_click_handler(mut self, handler: FeatureClickHandler) -> Self {
        self.click_handler = handler;
        self
    }

    pub fn active(&self) -> Option<&ActiveOverlay> {
        self.active.as_ref()
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    #[cfg(test)]
    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn into_map(self) -> M {
        self.map
    }

    /// Replace the active overlay with one for `entry`.
    ///
    /// On error the previous overlay stays attached and nothing new is on the map.
    pub fn swap(&mut self, entry: &TimeEntry) -> Result<SwapOutcome, OverlayError> {
        let ticket = self.begin();
        let prepared = self.build(entry)?;
        Ok(self.install(ticket, prepared))
    }

    pub fn begin(&mut self) -> SwapTicket {
        self.generation = self.generation.wrapping_add(1);
        SwapTicket {
            generation: self.generation,
        }
    }

    /// Construct a detached layer for `entry` with click inspection bound.
    pub fn build(&mut self, entry: &TimeEntry) -> Result<PreparedOverlay, OverlayError> {
        let spec = overlay_spec(&self.base_url, &entry.raw)?;
        let layer = self
            .map
            .create_layer(&spec)
            .map_err(OverlayError::Construction)?;
        // handlers are per layer and do not carry over from the previous one
        self.map
            .bind_feature_click(layer, Arc::clone(&self.click_handler));
        Ok(PreparedOverlay {
            layer,
            time: spec.time,
            url_template: spec.url_template,
        })
    }

    /// Put a built layer on the map unless a newer swap has started since `ticket`.
    ///
    /// The old layer is detached only once the new one is fully built, and the
    /// new one is attached in the same step, so at most one overlay is ever attached.
    pub fn install(&mut self, ticket: SwapTicket, prepared: PreparedOverlay) -> SwapOutcome {
        if ticket.generation != self.generation {
            debug!(
                layer = prepared.layer,
                time = %prepared.time,
                "discarding superseded overlay"
            );
            self.map.release(prepared.layer);
            return SwapOutcome::Superseded;
        }

        let previous = self.active.take();
        if let Some(previous) = &previous {
            self.map.detach(previous.layer);
        }
        self.map.attach(prepared.layer);
        if let Some(previous) = &previous {
            self.map.release(previous.layer);
        }

        info!(
            layer = prepared.layer,
            time = %prepared.time,
            replaced_time = previous.as_ref().map(|p| p.time.as_str()),
            "overlay swapped"
        );
        let layer = prepared.layer;
        self.active = Some(ActiveOverlay {
            layer,
            time: prepared.time,
            url_template: prepared.url_template,
        });
        SwapOutcome::Installed {
            layer,
            replaced: previous.map(|p| p.layer),
        }
    }

    /// Remove the overlay without replacement.
    pub fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(previous) = self.active.take() {
            self.map.detach(previous.layer);
            self.map.release(previous.layer);
        }
    }
}
