use std::collections::HashMap;
use std::sync::Arc;

use swh_shared::OverlayStyle;
use tracing::debug;

pub type LayerId = u64;
pub type FeatureProperties = serde_json::Map<String, serde_json::Value>;
pub type FeatureClickHandler = Arc<dyn Fn(LayerId, &FeatureProperties) + Send + Sync>;
pub type FeatureStyler = fn(&FeatureProperties) -> OverlayStyle;

/// Everything the map needs to build one time slice of the overlay.
#[derive(Debug, Clone)]
pub struct OverlaySpec {
    /// Tile URL with `{z}/{x}/{y}` left for the map to fill.
    pub url_template: String,
    pub time: String,
    pub min_detail_zoom: u8,
    pub max_detail_zoom: u8,
    /// Applied to every feature the layer draws.
    pub style: FeatureStyler,
}

/// The base map as seen by the overlay pipeline.
///
/// Layers are created detached; `attach` makes them visible. Released layers
/// must not be referenced again.
pub trait MapSurface {
    fn create_layer(&mut self, spec: &OverlaySpec) -> Result<LayerId, String>;
    fn bind_feature_click(&mut self, layer: LayerId, handler: FeatureClickHandler);
    fn attach(&mut self, layer: LayerId);
    fn detach(&mut self, layer: LayerId);
    fn release(&mut self, layer: LayerId);
    fn attached_count(&self) -> usize;
    /// How `layer` draws a feature with these properties. `None` for unknown layers.
    fn feature_style(&self, layer: LayerId, properties: &FeatureProperties) -> Option<OverlayStyle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOp {
    Created(LayerId),
    Attached(LayerId),
    Detached(LayerId),
    Released(LayerId),
}

struct HeadlessLayer {
    spec: OverlaySpec,
    attached: bool,
    click_handlers: Vec<FeatureClickHandler>,
}

/// In-memory map that tracks layer lifecycle instead of drawing.
#[derive(Default)]
pub struct HeadlessMap {
    layers: HashMap<LayerId, HeadlessLayer>,
    next_id: LayerId,
    ops: Vec<MapOp>,
    peak_attached: usize,
    refuse_creation: bool,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl HeadlessMap {
    /// Make subsequent `create_layer` calls fail, as a map would for an unusable source.
    pub fn set_refuse_creation(&mut self, refuse: bool) {
        self.refuse_creation = refuse;
    }

    pub fn ops(&self) -> &[MapOp] {
        &self.ops
    }

    pub fn live_layers(&self) -> usize {
        self.layers.len()
    }

    /// Highest number of simultaneously attached layers ever observed.
    pub fn peak_attached(&self) -> usize {
        self.peak_attached
    }

    pub fn attached_specs(&self) -> Vec<&OverlaySpec> {
        self.layers
            .values()
            .filter(|layer| layer.attached)
            .map(|layer| &layer.spec)
            .collect()
    }

    /// Deliver a feature click to the layer's handlers. Returns how many ran.
    pub fn click(&self, layer: LayerId, properties: &FeatureProperties) -> usize {
        let Some(entry) = self.layers.get(&layer) else {
            return 0;
        };
        for handler in &entry.click_handlers {
            handler(layer, properties);
        }
        entry.click_handlers.len()
    }
}

impl MapSurface for HeadlessMap {
    fn create_layer(&mut self, spec: &OverlaySpec) -> Result<LayerId, String> {
        if self.refuse_creation {
            return Err(format!("map refused layer for {}", spec.url_template));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.layers.insert(
            id,
            HeadlessLayer {
                spec: spec.clone(),
                attached: false,
                click_handlers: Vec::new(),
            },
        );
        self.ops.push(MapOp::Created(id));
        debug!(
            layer = id,
            url = %spec.url_template,
            min_zoom = spec.min_detail_zoom,
            max_zoom = spec.max_detail_zoom,
            "created overlay layer"
        );
        Ok(id)
    }

    fn bind_feature_click(&mut self, layer: LayerId, handler: FeatureClickHandler) {
        if let Some(entry) = self.layers.get_mut(&layer) {
            entry.click_handlers.push(handler);
        }
    }

    fn attach(&mut self, layer: LayerId) {
        let Some(entry) = self.layers.get_mut(&layer) else {
            return;
        };
        if entry.attached {
            return;
        }
        entry.attached = true;
        self.ops.push(MapOp::Attached(layer));
        self.peak_attached = self.peak_attached.max(self.attached_count());
        debug!(layer, "attached overlay layer");
    }

    fn detach(&mut self, layer: LayerId) {
        let Some(entry) = self.layers.get_mut(&layer) else {
            return;
        };
        if !entry.attached {
            return;
        }
        entry.attached = false;
        self.ops.push(MapOp::Detached(layer));
        debug!(layer, time = %entry.spec.time, "detached overlay layer");
    }

    fn release(&mut self, layer: LayerId) {
        if self.layers.remove(&layer).is_some() {
            self.ops.push(MapOp::Released(layer));
            debug!(layer, "released overlay layer");
        }
    }

    fn attached_count(&self) -> usize {
        self.layers.values().filter(|layer| layer.attached).count()
    }

    fn feature_style(&self, layer: LayerId, properties: &FeatureProperties) -> Option<OverlayStyle> {
        self.layers
            .get(&layer)
            .map(|entry| (entry.spec.style)(properties))
    }
}
