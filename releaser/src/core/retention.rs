//! Retention policy: which releases on one host may be deleted.
//!
//! Pure function of its inputs. The scan walks releases newest first with a
//! running count of valid releases:
//!
//! 1. the current release and the in-progress release are protected; the
//!    current release always counts as valid, the in-progress one only once it
//!    has been recorded;
//! 2. recorded releases are valid, and removable once the count exceeds `keep`
//!    unless an unexpired keep-until marker holds them;
//! 3. unrecorded releases with an unexpired marker are held (not counted);
//! 4. releases with an expired marker, or with neither record nor marker, are
//!    removable.
//!
//! Before anything is removed three gates must pass; a failing gate turns the
//! whole pass into a no-op ([`RetentionDecision::Aborted`]).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::marker::KeepUntilMarker;
use crate::core::record::ReleaseRecord;
use crate::core::release_id::{ReleaseOrdering, newest_first};

pub const DEFAULT_KEEP: usize = 3;

/// Everything the evaluator looks at for one host.
#[derive(Debug, Clone)]
pub struct RetentionInput<'a> {
    /// Release directory names in listing order (oldest first).
    pub releases: &'a [String],
    pub ordering: ReleaseOrdering,
    /// Release being built by this operation, if any.
    pub in_progress: Option<&'a str>,
    /// Release the current pointer targets, if the pointer exists.
    pub current: Option<&'a str>,
    pub record: &'a ReleaseRecord,
    /// Valid keep-until markers by release name.
    pub markers: &'a BTreeMap<String, KeepUntilMarker>,
    pub now: DateTime<Utc>,
    pub keep: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Target of the current pointer.
    Current,
    /// Release under construction.
    InProgress,
    /// Recorded and inside the retention window.
    Retained,
    /// Unexpired keep-until marker.
    Held { until: DateTime<Utc> },
    /// Recorded but beyond the `keep` newest valid releases.
    BeyondRetention,
    /// Keep-until marker has lapsed.
    MarkerExpired,
    /// Neither recorded nor marked: an abandoned or failed deploy.
    Unconfirmed,
}

impl Verdict {
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Self::BeyondRetention | Self::MarkerExpired | Self::Unconfirmed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseVerdict {
    pub release: String,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Classification of every release, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPlan {
    pub verdicts: Vec<ReleaseVerdict>,
    pub valid_count: usize,
    pub keep: usize,
}

impl RetentionPlan {
    /// Releases queued for removal, newest first.
    pub fn to_remove(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|v| v.verdict.is_removal())
            .map(|v| v.release.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.verdicts.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    WouldRemoveAll,
    WouldRemoveInProgress,
    InsufficientValidReleases,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::WouldRemoveAll => "would remove all",
            Self::WouldRemoveInProgress => "would remove current",
            Self::InsufficientValidReleases => "insufficient valid releases",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionDecision {
    /// Gates passed; the plan's removals may be carried out.
    Prune(RetentionPlan),
    /// A gate tripped; nothing may be removed.
    Aborted {
        reason: AbortReason,
        plan: RetentionPlan,
    },
}

impl RetentionDecision {
    pub fn plan(&self) -> &RetentionPlan {
        match self {
            Self::Prune(plan) | Self::Aborted { plan, .. } => plan,
        }
    }

    /// Releases to delete; always empty when aborted.
    pub fn removals(&self) -> Vec<String> {
        match self {
            Self::Prune(plan) => plan.to_remove(),
            Self::Aborted { .. } => Vec::new(),
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Prune(_) => None,
            Self::Aborted { reason, .. } => Some(*reason),
        }
    }
}

impl fmt::Display for RetentionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan();
        let queued = plan.verdicts.iter().filter(|v| v.verdict.is_removal()).count();
        match self {
            Self::Prune(_) => write!(
                f,
                "prune {queued} of {} releases (valid {}/{})",
                plan.total(),
                plan.valid_count,
                plan.keep
            ),
            Self::Aborted { reason, .. } => write!(
                f,
                "aborted: {reason} (valid {}/{}, {queued} of {} queued for removal)",
                plan.valid_count,
                plan.keep,
                plan.total()
            ),
        }
    }
}

/// Classify releases newest first and apply the safety gates.
pub fn evaluate(input: &RetentionInput<'_>) -> RetentionDecision {
    let mut valid_count = 0usize;
    let mut verdicts = Vec::with_capacity(input.releases.len());

    for release in newest_first(input.releases, input.ordering) {
        let recorded = input.record.contains(&release);
        let held = input
            .markers
            .get(&release)
            .filter(|marker| marker.is_held(input.now));
        let verdict = if input.current == Some(release.as_str()) {
            valid_count += 1;
            Verdict::Current
        } else if input.in_progress == Some(release.as_str()) {
            // Counts toward `keep` only once its deploy has been recorded.
            if recorded {
                valid_count += 1;
            }
            Verdict::InProgress
        } else if recorded {
            valid_count += 1;
            match held {
                _ if valid_count <= input.keep => Verdict::Retained,
                Some(marker) => Verdict::Held {
                    until: marker.expiry,
                },
                None => Verdict::BeyondRetention,
            }
        } else {
            match (held, input.markers.contains_key(&release)) {
                (Some(marker), _) => Verdict::Held {
                    until: marker.expiry,
                },
                (None, true) => Verdict::MarkerExpired,
                (None, false) => Verdict::Unconfirmed,
            }
        };
        verdicts.push(ReleaseVerdict { release, verdict });
    }

    let plan = RetentionPlan {
        verdicts,
        valid_count,
        keep: input.keep,
    };
    match gate(&plan, input.in_progress) {
        Some(reason) => RetentionDecision::Aborted { reason, plan },
        None => RetentionDecision::Prune(plan),
    }
}

fn gate(plan: &RetentionPlan, in_progress: Option<&str>) -> Option<AbortReason> {
    let to_remove = plan.to_remove();
    if !plan.verdicts.is_empty() && to_remove.len() == plan.total() {
        return Some(AbortReason::WouldRemoveAll);
    }
    if let Some(in_progress) = in_progress
        && to_remove.iter().any(|release| release == in_progress)
    {
        return Some(AbortReason::WouldRemoveInProgress);
    }
    if plan.valid_count < plan.keep {
        return Some(AbortReason::InsufficientValidReleases);
    }
    None
}
