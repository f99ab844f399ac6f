use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One advertised forecast time: the server's raw string plus its parsed instant.
///
/// `raw` is kept verbatim because it is what gets substituted into overlay URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub raw: String,
    pub instant: DateTime<Utc>,
}

impl TimeEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let instant = parse_instant(raw)?;
        Some(Self {
            raw: raw.to_string(),
            instant,
        })
    }
}

/// Parse an ISO-8601 timestamp. Zone-less values are read as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Ascending, instant-deduplicated list of valid forecast times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeCatalog {
    entries: Vec<TimeEntry>,
}

/// Result of building a catalog from server text, including items that were dropped.
#[derive(Debug, Clone, Default)]
pub struct CatalogParse {
    pub catalog: TimeCatalog,
    pub rejected: Vec<String>,
}

impl TimeCatalog {
    pub fn new(entries: Vec<TimeEntry>) -> Self {
        let mut entries = entries;
        if !entries.windows(2).all(|w| w[0].instant <= w[1].instant) {
            // stable: first occurrence of an instant stays first
            entries.sort_by_key(|entry| entry.instant);
        }
        entries.dedup_by(|later, earlier| later.instant == earlier.instant);
        Self { entries }
    }

    /// Build a catalog from a comma-separated list such as a WMS time dimension.
    pub fn from_comma_separated(text: &str) -> CatalogParse {
        let mut entries = Vec::new();
        let mut rejected = Vec::new();
        for item in text.trim().split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match TimeEntry::parse(item) {
                Some(entry) => entries.push(entry),
                None => rejected.push(item.to_string()),
            }
        }
        CatalogParse {
            catalog: Self::new(entries),
            rejected,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimeEntry] {
        &self.entries
    }

    pub fn first(&self) -> Option<&TimeEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&TimeEntry> {
        self.entries.last()
    }

    pub fn raw_values(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.raw.clone()).collect()
    }

    fn position(&self, instant: DateTime<Utc>) -> Option<usize> {
        self.entries
            .binary_search_by_key(&instant, |entry| entry.instant)
            .ok()
    }

    /// Resolve a requested timestamp to its catalog entry.
    ///
    /// Matching is by instant, so `2024-03-01T12:00:00Z` finds an entry the server
    /// spelled `2024-03-01T12:00:00.000Z`.
    pub fn lookup(&self, raw: &str) -> Result<&TimeEntry, LookupError> {
        if self.is_empty() {
            return Err(LookupError::EmptyCatalog);
        }
        let instant =
            parse_instant(raw).ok_or_else(|| LookupError::Malformed(raw.trim().to_string()))?;
        self.position(instant)
            .map(|idx| &self.entries[idx])
            .ok_or_else(|| LookupError::NotInCatalog(raw.trim().to_string()))
    }

    /// Latest entry at or before `reference`, else the last entry.
    pub fn select_initial(&self, reference: DateTime<Utc>) -> Option<&TimeEntry> {
        let idx = self
            .entries
            .partition_point(|entry| entry.instant <= reference);
        if idx == 0 {
            self.entries.last()
        } else {
            self.entries.get(idx - 1)
        }
    }

    /// Neighbor of `from` by `offset` positions, clamped to the catalog bounds.
    pub fn step(&self, from: &TimeEntry, offset: isize) -> Option<&TimeEntry> {
        let idx = self.position(from.instant)?;
        let last = self.entries.len() - 1;
        let target = idx.saturating_add_signed(offset).min(last);
        self.entries.get(target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    EmptyCatalog,
    Malformed(String),
    NotInCatalog(String),
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCatalog => write!(f, "time catalog is empty"),
            Self::Malformed(raw) => write!(f, "malformed timestamp {raw:?}"),
            Self::NotInCatalog(raw) => write!(f, "timestamp {raw:?} is not in the catalog"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Wall-clock reference for initial selection: `now` truncated to the hour.
pub fn reference_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_minute(0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_instant(raw).expect("test timestamp should parse")
    }

    fn catalog(values: &[&str]) -> TimeCatalog {
        TimeCatalog::from_comma_separated(&values.join(",")).catalog
    }

    #[test]
    fn parses_comma_separated_list_in_server_order() {
        let parsed = TimeCatalog::from_comma_separated(
            " 2024-03-01T06:00:00Z,2024-03-01T12:00:00Z , 2024-03-01T18:00:00Z\n",
        );
        assert!(parsed.rejected.is_empty());
        assert_eq!(
            parsed.catalog.raw_values(),
            vec![
                "2024-03-01T06:00:00Z",
                "2024-03-01T12:00:00Z",
                "2024-03-01T18:00:00Z"
            ]
        );
    }

    #[test]
    fn drops_malformed_and_empty_items() {
        let parsed = TimeCatalog::from_comma_separated("2024-03-01T06:00:00Z,,not-a-time,");
        assert_eq!(parsed.catalog.len(), 1);
        assert_eq!(parsed.rejected, vec!["not-a-time".to_string()]);
    }

    #[test]
    fn empty_text_gives_empty_catalog() {
        let parsed = TimeCatalog::from_comma_separated("   ");
        assert!(parsed.catalog.is_empty());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn sorts_unordered_input_and_keeps_first_duplicate() {
        let parsed = TimeCatalog::from_comma_separated(
            "2024-03-01T18:00:00Z,2024-03-01T06:00:00Z,2024-03-01T06:00:00.000Z",
        );
        assert_eq!(
            parsed.catalog.raw_values(),
            vec!["2024-03-01T06:00:00Z", "2024-03-01T18:00:00Z"]
        );
    }

    #[test]
    fn zoneless_timestamps_are_utc() {
        assert_eq!(at("2024-03-01T12:00:00"), at("2024-03-01T12:00:00Z"));
        assert_eq!(at("2024-03-01T13:00:00+01:00"), at("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn selects_latest_entry_not_after_reference() {
        let c = catalog(&[
            "2024-03-01T06:00:00Z",
            "2024-03-01T12:00:00Z",
            "2024-03-01T18:00:00Z",
        ]);
        let picked = c.select_initial(at("2024-03-01T13:00:00Z")).map(|e| e.raw.as_str());
        assert_eq!(picked, Some("2024-03-01T12:00:00Z"));

        let exact = c.select_initial(at("2024-03-01T18:00:00Z")).map(|e| e.raw.as_str());
        assert_eq!(exact, Some("2024-03-01T18:00:00Z"));

        let later = c.select_initial(at("2025-01-01T00:00:00Z")).map(|e| e.raw.as_str());
        assert_eq!(later, Some("2024-03-01T18:00:00Z"));
    }

    #[test]
    fn falls_back_to_last_entry_when_all_in_future() {
        let c = catalog(&["2030-01-01T00:00:00Z", "2030-01-01T06:00:00Z"]);
        let picked = c.select_initial(at("2024-03-01T13:00:00Z")).map(|e| e.raw.as_str());
        assert_eq!(picked, Some("2030-01-01T06:00:00Z"));
    }

    #[test]
    fn empty_catalog_selects_nothing() {
        assert!(
            TimeCatalog::default()
                .select_initial(at("2024-03-01T13:00:00Z"))
                .is_none()
        );
    }

    #[test]
    fn selection_matches_linear_scan_for_every_hour() {
        let c = catalog(&[
            "2024-03-01T03:00:00Z",
            "2024-03-01T06:00:00Z",
            "2024-03-01T09:00:00Z",
            "2024-03-01T21:00:00Z",
        ]);
        for hour in 0..24 {
            let reference = at(&format!("2024-03-01T{hour:02}:00:00Z"));
            let expected = c
                .entries()
                .iter()
                .rev()
                .find(|entry| entry.instant <= reference)
                .or(c.last());
            assert_eq!(c.select_initial(reference), expected, "hour {hour}");
        }
    }

    #[test]
    fn reference_hour_truncates_minutes_and_seconds() {
        assert_eq!(
            reference_hour(at("2024-03-01T13:47:12.345Z")),
            at("2024-03-01T13:00:00Z")
        );
    }

    #[test]
    fn lookup_distinguishes_malformed_and_unknown() {
        let c = catalog(&["2024-03-01T06:00:00Z"]);
        assert_eq!(
            c.lookup("2024-03-01T06:00:00.000Z").map(|e| e.raw.as_str()),
            Ok("2024-03-01T06:00:00Z")
        );
        assert_eq!(
            c.lookup("yesterday"),
            Err(LookupError::Malformed("yesterday".to_string()))
        );
        assert_eq!(
            c.lookup("2024-03-01T07:00:00Z"),
            Err(LookupError::NotInCatalog("2024-03-01T07:00:00Z".to_string()))
        );
        assert_eq!(
            TimeCatalog::default().lookup("2024-03-01T06:00:00Z"),
            Err(LookupError::EmptyCatalog)
        );
    }

    #[test]
    fn step_clamps_at_both_ends() {
        let c = catalog(&[
            "2024-03-01T06:00:00Z",
            "2024-03-01T12:00:00Z",
            "2024-03-01T18:00:00Z",
        ]);
        let first = c.first().cloned().expect("first entry");
        let last = c.last().cloned().expect("last entry");

        assert_eq!(c.step(&first, -1), Some(&first));
        assert_eq!(
            c.step(&first, 1).map(|e| e.raw.as_str()),
            Some("2024-03-01T12:00:00Z")
        );
        assert_eq!(c.step(&last, 1), Some(&last));
    }
}
