use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Feature property carrying the contour's lower significant-wave-height bound.
pub const HEIGHT_PROPERTY: &str = "swh_height_min";

pub const LEGEND_TITLE: &str = "DMI WAM model | Significant Wave Height (m)";

/// Highest breakpoint; anything above it is out of range.
pub const MAX_BREAKPOINT: f64 = 15.0;

pub const OUT_OF_RANGE_COLOR: &str = "#000000";
pub const DEFAULT_COLOR: &str = "#ffffff";
const OUTLINE_COLOR: &str = "#000000";

/// Breakpoint (m) to fill color, ascending.
pub const SWH_PALETTE: [(f64, &str); 31] = [
    (0.0, "#001f3f"),
    (0.5, "#003366"),
    (1.0, "#004080"),
    (1.5, "#0059b3"),
    (2.0, "#0073e6"),
    (2.5, "#3399ff"),
    (3.0, "#66b3ff"),
    (3.5, "#99ccff"),
    (4.0, "#cce6ff"),
    (4.5, "#00ffff"),
    (5.0, "#00ffcc"),
    (5.5, "#00ff99"),
    (6.0, "#99ff33"),
    (6.5, "#ffff00"),
    (7.0, "#ffcc00"),
    (7.5, "#ff9933"),
    (8.0, "#ff6600"),
    (8.5, "#ff3300"),
    (9.0, "#ff0000"),
    (9.5, "#e60000"),
    (10.0, "#cc0000"),
    (10.5, "#b30000"),
    (11.0, "#990000"),
    (11.5, "#800000"),
    (12.0, "#660000"),
    (12.5, "#4d0000"),
    (13.0, "#330000"),
    (13.5, "#1a0000"),
    (14.0, "#0d0000"),
    (14.5, "#050000"),
    (15.0, "#000000"),
];

/// Path style handed to the vector-tile renderer for one contour polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayStyle {
    pub fill: bool,
    pub stroke: bool,
    pub color: String,
    pub weight: u32,
    pub fill_color: String,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub value: f64,
    pub color: String,
    pub label: String,
}

/// Swatch color for a height: exact breakpoint match, terminal above range, default otherwise.
pub fn height_color(value: f64) -> &'static str {
    if value > MAX_BREAKPOINT {
        return OUT_OF_RANGE_COLOR;
    }
    SWH_PALETTE
        .binary_search_by(|(breakpoint, _)| {
            breakpoint.partial_cmp(&value).unwrap_or(Ordering::Less)
        })
        .map(|idx| SWH_PALETTE[idx].1)
        .unwrap_or(DEFAULT_COLOR)
}

pub fn resolve_style(value: f64) -> OverlayStyle {
    OverlayStyle {
        fill: true,
        stroke: true,
        color: OUTLINE_COLOR.to_string(),
        weight: 1,
        fill_color: height_color(value).to_string(),
        fill_opacity: 0.8,
    }
}

/// Style a feature from its properties. Heights may arrive as numbers or numeric strings.
pub fn style_for_properties(
    properties: &serde_json::Map<String, serde_json::Value>,
) -> OverlayStyle {
    let height = properties
        .get(HEIGHT_PROPERTY)
        .and_then(parse_height)
        .unwrap_or(f64::NAN);
    resolve_style(height)
}

fn parse_height(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => leading_number(s),
        _ => None,
    }
}

/// Longest numeric prefix of `text`, so `"1.5 m"` reads as 1.5.
fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map_or(text.len(), |(idx, _)| idx);
    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
}

/// Legend rows: each breakpoint labelled up to the next one, the last open-ended.
pub fn legend_entries() -> Vec<LegendEntry> {
    SWH_PALETTE
        .iter()
        .enumerate()
        .map(|(idx, &(value, _))| {
            let label = match SWH_PALETTE.get(idx + 1) {
                Some(&(next, _)) => format!("{value}\u{2013}{next}"),
                None => format!("{value}+"),
            };
            LegendEntry {
                value,
                color: height_color(value).to_string(),
                label,
            }
        })
        .collect()
}
