//! In-memory model of a host's release record.
//!
//! The record is an append-mostly log: entries are only ever appended, and the
//! single sanctioned mutation is dropping the most recent entry. Lines are kept
//! exactly as persisted (deploys write absolute release paths,
//! older hosts may carry bare ids); lookups compare the final path segment.

/// Ordered log of releases that completed a successful deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseRecord {
    entries: Vec<String>,
}

/// Why a record mutation or lookup could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    Empty,
    InsufficientHistory { entries: usize },
}

impl ReleaseRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from persisted lines, skipping blank lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self { entries }
    }

    /// Append an entry. Duplicates are kept.
    pub fn append(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Drop the most recent entry, returning it.
    pub fn remove_last(&mut self) -> Result<String, RecordError> {
        self.entries.pop().ok_or(RecordError::Empty)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry before the last one: the previous known-good release.
    pub fn second_to_last(&self) -> Result<&str, RecordError> {
        let len = self.entries.len();
        if len < 2 {
            return Err(RecordError::InsufficientHistory { entries: len });
        }
        Ok(&self.entries[len - 2])
    }

    /// True if any entry names `release_id` (as a bare id or as a path ending in it).
    pub fn contains(&self, release_id: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| release_name(entry) == release_id)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Final `/`-separated segment of a record line, ignoring trailing slashes.
pub fn release_name(entry: &str) -> &str {
    let trimmed = entry.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_remove_last_restores_sequence() {
        let mut record = ReleaseRecord::from_lines(["r1", "r2"]);
        let before = record.clone();
        record.append("r3");
        assert_eq!(record.remove_last(), Ok("r3".to_string()));
        assert_eq!(record, before);
    }

    #[test]
    fn remove_last_walks_down_to_empty_then_fails() {
        let mut record = ReleaseRecord::from_lines(["r1", "r2"]);
        record.remove_last().expect("remove r2");
        assert_eq!(record.entries(), ["r1".to_string()]);
        record.remove_last().expect("remove r1");
        assert!(record.is_empty());
        assert_eq!(record.remove_last(), Err(RecordError::Empty));
    }

    #[test]
    fn duplicates_do_not_collapse() {
        let mut record = ReleaseRecord::new();
        record.append("r1");
        record.append("r1");
        assert_eq!(record.count(), 2);
    }

    #[test]
    fn second_to_last_requires_two_entries() {
        let record = ReleaseRecord::from_lines(["r1"]);
        assert_eq!(
            record.second_to_last(),
            Err(RecordError::InsufficientHistory { entries: 1 })
        );
        let record = ReleaseRecord::from_lines(["r1", "r2", "r3"]);
        assert_eq!(record.second_to_last(), Ok("r2"));
    }

    #[test]
    fn contains_matches_paths_by_final_segment() {
        let record = ReleaseRecord::from_lines([
            "/www/app/releases/2024-03-01_10.00",
            "2024-03-02_10.00",
            "",
        ]);
        assert_eq!(record.count(), 2);
        assert!(record.contains("2024-03-01_10.00"));
        assert!(record.contains("2024-03-02_10.00"));
        assert!(!record.contains("2024-03-01"));
        assert!(!record.contains("releases"));
    }

    #[test]
    fn release_name_ignores_trailing_slash() {
        assert_eq!(release_name("/a/b/r1/"), "r1");
        assert_eq!(release_name("r1"), "r1");
    }
}
