//! Keep-until markers: a time-bound exemption from count-based eviction.
//!
//! A marker is an empty file inside the release directory whose name carries
//! its expiry, e.g. `KEEP_UNTIL__20240315093000`.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::Serialize;

pub const KEEP_UNTIL_PREFIX: &str = "KEEP_UNTIL__";
pub const MARKER_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct KeepUntilMarker {
    pub expiry: DateTime<Utc>,
}

impl KeepUntilMarker {
    /// Marker expiring `days` days after `now`, truncated to whole seconds.
    pub fn after_days(now: DateTime<Utc>, days: u16) -> Self {
        let expiry = now + TimeDelta::days(i64::from(days));
        // The file name has second precision; keep the in-memory value equal to disk.
        let expiry = expiry.with_nanosecond(0).unwrap_or(expiry);
        Self { expiry }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{KEEP_UNTIL_PREFIX}{}",
            self.expiry.naive_utc().format(MARKER_DATE_FORMAT)
        )
    }

    /// Parse a marker file name. `None` for non-marker names and malformed dates.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let date = name.strip_prefix(KEEP_UNTIL_PREFIX)?;
        NaiveDateTime::parse_from_str(date, MARKER_DATE_FORMAT)
            .ok()
            .map(|naive| Self {
                expiry: naive.and_utc(),
            })
    }

    /// An unexpired marker protects its release.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

pub fn is_marker_file(name: &str) -> bool {
    name.starts_with(KEEP_UNTIL_PREFIX)
}

/// Markers found in one release directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerScan {
    /// Latest-expiring valid marker, if any.
    pub marker: Option<KeepUntilMarker>,
    /// Marker-prefixed names whose date could not be parsed.
    pub malformed: Vec<String>,
}

/// Inspect a release directory listing for keep-until markers.
pub fn scan_markers<S: AsRef<str>>(entries: &[S]) -> MarkerScan {
    let mut scan = MarkerScan::default();
    let names = entries.iter().map(AsRef::<str>::as_ref);
    for name in names.filter(|name| is_marker_file(name)) {
        match KeepUntilMarker::from_file_name(name) {
            Some(marker) => scan.marker = scan.marker.max(Some(marker)),
            None => scan.malformed.push(name.to_string()),
        }
    }
    scan
}
