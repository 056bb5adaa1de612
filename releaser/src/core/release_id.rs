//! Release identifiers and the order in which a host's releases are scanned.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-width UTC timestamp used for release directory names.
pub const RELEASE_ID_FORMAT: &str = "%Y-%m-%d_%H.%M";

/// Release id for a deploy starting at `now`.
pub fn new_release_id(now: DateTime<Utc>) -> String {
    now.format(RELEASE_ID_FORMAT).to_string()
}

/// Timestamp embedded in a release name, if it has one.
pub fn parse_release_timestamp(name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(name, RELEASE_ID_FORMAT).ok()
}

/// How a directory listing is turned into a newest-first scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseOrdering {
    /// Trust the listing: it is oldest-first, so the scan is its reverse.
    Listing,
    /// Sort by the embedded timestamp. Names without one keep their listing
    /// order relative to each other and rank older than any timestamped name.
    #[default]
    Timestamp,
}

/// Return release names newest first.
pub fn newest_first(listing: &[String], ordering: ReleaseOrdering) -> Vec<String> {
    let mut ordered: Vec<String> = listing.to_vec();
    if ordering == ReleaseOrdering::Timestamp {
        // Stable: untimestamped names keep their relative listing order.
        ordered.sort_by_key(|name| parse_release_timestamp(name));
    }
    ordered.reverse();
    ordered
}
