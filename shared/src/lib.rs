pub mod catalog;
pub mod events;
pub mod style;
pub mod time_format;

pub use catalog::{LookupError, TimeCatalog, TimeEntry, reference_hour};
pub use events::*;
pub use style::{LegendEntry, OverlayStyle, legend_entries, resolve_style};
pub use time_format::{TimeReadout, format_readout};
