use serde::Serialize;
use swh_shared::style::LEGEND_TITLE;

/// Screen regions controls can be docked to.
///
/// The four corners plus the centered and middle positions the overlay UI
/// needs for its title panel and time control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    TopCenter,
    MiddleCenter,
    MiddleLeft,
    MiddleRight,
    BottomCenter,
}

impl Region {
    pub const ALL: [Region; 9] = [
        Region::TopLeft,
        Region::TopRight,
        Region::BottomLeft,
        Region::BottomRight,
        Region::TopCenter,
        Region::MiddleCenter,
        Region::MiddleLeft,
        Region::MiddleRight,
        Region::BottomCenter,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlSlot {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionLayout {
    pub region: Region,
    pub controls: Vec<ControlSlot>,
}

/// Which control lives in which region. Built next to the map, not inside it.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutRegistry {
    regions: Vec<RegionLayout>,
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self {
            regions: Region::ALL
                .iter()
                .map(|&region| RegionLayout {
                    region,
                    controls: Vec::new(),
                })
                .collect(),
        }
    }
}

impl LayoutRegistry {
    pub const READOUT: &'static str = "time-readout";
    pub const LEGEND: &'static str = "legend";
    pub const TIME_CONTROL: &'static str = "time-control";

    /// Title and readout on top, legend bottom right, time control bottom center.
    pub fn wave_height_default() -> Self {
        let mut registry = Self::default();
        let slots = [
            (Region::TopCenter, Self::READOUT, Some(LEGEND_TITLE)),
            (Region::BottomRight, Self::LEGEND, None),
            (Region::BottomCenter, Self::TIME_CONTROL, None),
        ];
        for (region, id, title) in slots {
            // ids above are distinct
            let _ = registry.register(region, id, title);
        }
        registry
    }

    pub fn register(
        &mut self,
        region: Region,
        id: &str,
        title: Option<&str>,
    ) -> Result<(), String> {
        if self.region_of(id).is_some() {
            return Err(format!("control {id:?} is already registered"));
        }
        let Some(layout) = self
            .regions
            .iter_mut()
            .find(|layout| layout.region == region)
        else {
            return Err(format!("unknown region {region:?}"));
        };
        layout.controls.push(ControlSlot {
            id: id.to_string(),
            title: title.map(str::to_string),
        });
        Ok(())
    }

    pub fn region_of(&self, id: &str) -> Option<Region> {
        self.regions
            .iter()
            .find(|layout| layout.controls.iter().any(|slot| slot.id == id))
            .map(|layout| layout.region)
    }

    #[cfg(test)]
    pub fn controls_in(&self, region: Region) -> &[ControlSlot] {
        self.regions
            .iter()
            .find(|layout| layout.region == region)
            .map(|layout| layout.controls.as_slice())
            .unwrap_or(&[])
    }

    pub fn regions(&self) -> &[RegionLayout] {
        &self.regions
    }
}
