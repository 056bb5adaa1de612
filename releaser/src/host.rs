//! Release lifecycle on a single host.
//!
//! [`HostLifecycle`] is the per-host state machine: it records releases,
//! cuts the current pointer over, attaches keep-until markers, and runs the
//! retention pass. Every step goes through [`RemoteFs`], so the same code
//! drives ssh hosts, local directories, and in-memory test hosts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::layout::{ReleaseLayout, is_valid_release_id, join};
use crate::core::marker::{KeepUntilMarker, is_marker_file, scan_markers};
use crate::core::record::{RecordError, ReleaseRecord, release_name};
use crate::core::release_id::ReleaseOrdering;
use crate::core::retention::{
    AbortReason, DEFAULT_KEEP, RetentionInput, RetentionPlan, evaluate,
};
use crate::error::{LifecycleError, Result};
use crate::io::remote::RemoteFs;
use crate::io::shell::quote;

/// Knobs for one retention pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    pub keep: usize,
    pub ordering: ReleaseOrdering,
    /// Release being built right now; never removed.
    pub in_progress: Option<String>,
    /// Evaluate and report without deleting anything.
    pub dry_run: bool,
    /// Linked-subsystem cleanup, run inside the releases directory after a prune.
    pub post_commands: Vec<String>,
    /// Background garbage collection inside the current release after a prune.
    pub gc_command: Option<String>,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            keep: DEFAULT_KEEP,
            ordering: ReleaseOrdering::default(),
            in_progress: None,
            dry_run: false,
            post_commands: Vec::new(),
            gc_command: None,
        }
    }
}

/// A cleanup step that failed after the gates passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub reason: String,
}

/// What one retention pass decided and did on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    /// Decision in words, naming the gate and counts when aborted.
    pub summary: String,
    pub aborted: Option<AbortReason>,
    pub plan: RetentionPlan,
    /// Releases actually deleted.
    pub removed: Vec<String>,
    /// Removals or hooks that failed; removal is best effort per release.
    pub failures: Vec<StepFailure>,
    pub dry_run: bool,
}

impl CleanupOutcome {
    /// `true` unless a removal or a post-cleanup hook failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of record + cutover + retention for one successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishOutcome {
    /// Absolute path now recorded and served.
    pub release: String,
    pub cleanup: CleanupOutcome,
}

/// Lifecycle operations for one host.
#[derive(Debug)]
pub struct HostLifecycle<F> {
    fs: F,
    layout: ReleaseLayout,
}

impl<F: RemoteFs> HostLifecycle<F> {
    pub fn new(fs: F, layout: ReleaseLayout) -> Self {
        Self { fs, layout }
    }

    pub fn host(&self) -> &str {
        self.fs.host()
    }

    /// Current contents of the release record.
    pub fn record(&self) -> Result<ReleaseRecord> {
        let lines = self.fs.read_lines(&self.layout.record_file)?;
        Ok(ReleaseRecord::from_lines(lines))
    }

    /// Append the release to the record. Repeats are kept.
    #[instrument(skip_all, fields(host = %self.host(), release = release_id))]
    pub fn record_success(&self, release_id: &str) -> Result<String> {
        let path = self.release_path(release_id)?;
        self.fs.append_line(&self.layout.record_file, &path)?;
        info!("recorded successful release");
        Ok(path)
    }

    /// Undo the most recent [`Self::record_success`], returning the dropped entry.
    #[instrument(skip_all, fields(host = %self.host()))]
    pub fn record_failure(&self) -> Result<String> {
        let mut record = self.record()?;
        let removed = record
            .remove_last()
            .map_err(|err| self.record_error(err))?;
        self.fs.delete_last_line(&self.layout.record_file)?;
        warn!(entry = %removed, "dropped last release record entry");
        Ok(removed)
    }

    pub fn release_count(&self) -> Result<usize> {
        Ok(self.record()?.count())
    }

    /// Entry before the last one: the release that served before the latest deploy.
    pub fn previous_release(&self) -> Result<String> {
        let record = self.record()?;
        record
            .second_to_last()
            .map(str::to_string)
            .map_err(|err| self.record_error(err))
    }

    pub fn contains(&self, release_id: &str) -> Result<bool> {
        Ok(self.record()?.contains(release_id))
    }

    /// Materialize the release directory (deploy start).
    #[instrument(skip_all, fields(host = %self.host(), release = release_id))]
    pub fn create_release(&self, release_id: &str) -> Result<String> {
        let path = self.release_path(release_id)?;
        self.fs.make_dir(&path)?;
        info!(path = %path, "created release directory");
        Ok(path)
    }

    pub fn release_exists(&self, release_id: &str) -> Result<bool> {
        if !is_valid_release_id(release_id) {
            return Ok(false);
        }
        self.fs.is_dir(&self.layout.release_path(release_id))
    }

    /// Name of the release the current pointer targets, if the pointer exists.
    pub fn current_release(&self) -> Result<Option<String>> {
        let target = self.fs.read_link(&self.layout.current_link)?;
        Ok(target.map(|target| release_name(&target).to_string()))
    }

    /// Repoint current at the release. Nothing changes if the release is missing.
    #[instrument(skip_all, fields(host = %self.host(), release = release_id))]
    pub fn set_current(&self, release_id: &str) -> Result<String> {
        let path = self.existing_release_path(release_id)?;
        self.fs.replace_link(&self.layout.current_link, &path)?;
        info!(target = %path, "current now points at release");
        Ok(path)
    }

    /// Hold the release for `days` days. Replaces any earlier marker.
    #[instrument(skip_all, fields(host = %self.host(), release = release_id, days = days))]
    pub fn mark_keep_until(
        &self,
        release_id: &str,
        days: u16,
        now: DateTime<Utc>,
    ) -> Result<KeepUntilMarker> {
        let path = self.existing_release_path(release_id)?;
        let marker = KeepUntilMarker::after_days(now, days);
        let file_name = marker.file_name();
        // The new hold is in place before any earlier one goes away.
        self.fs.touch(&join(&path, &file_name))?;
        let entries = self.fs.list_dir(&path)?;
        for stale in entries.iter().filter(|name| is_marker_file(name) && **name != file_name) {
            debug!(marker = %stale, "removing previous keep-until marker");
            self.fs.remove_tree(&join(&path, stale))?;
        }
        info!(expiry = %marker.expiry, "release held");
        Ok(marker)
    }

    /// Evaluate retention and, unless a gate trips or this is a dry run,
    /// delete what the plan queues.
    #[instrument(
        skip_all,
        fields(host = %self.host(), keep = options.keep, dry_run = options.dry_run)
    )]
    pub fn cleanup(&self, options: &CleanupOptions, now: DateTime<Utc>) -> Result<CleanupOutcome> {
        let releases = self.fs.list_dir(&self.layout.releases_dir)?;
        let current = self.current_release()?;
        let record = self.record()?;
        let markers = self.read_markers(&releases)?;

        let decision = evaluate(&RetentionInput {
            releases: &releases,
            ordering: options.ordering,
            in_progress: options.in_progress.as_deref(),
            current: current.as_deref(),
            record: &record,
            markers: &markers,
            now,
            keep: options.keep,
        });
        let mut outcome = CleanupOutcome {
            summary: decision.to_string(),
            aborted: decision.abort_reason(),
            plan: decision.plan().clone(),
            removed: Vec::new(),
            failures: Vec::new(),
            dry_run: options.dry_run,
        };

        if outcome.aborted.is_some() {
            warn!(decision = %outcome.summary, "cleanup aborted, nothing removed");
            return Ok(outcome);
        }
        if options.dry_run {
            info!(decision = %outcome.summary, "dry run, nothing removed");
            return Ok(outcome);
        }

        for release in decision.removals() {
            match self.fs.remove_tree(&self.layout.release_path(&release)) {
                Ok(()) => {
                    info!(release = %release, "removed release");
                    outcome.removed.push(release);
                }
                Err(err) => {
                    warn!(release = %release, error = %err, "failed to remove release");
                    outcome.failures.push(StepFailure {
                        step: format!("remove {release}"),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if outcome.is_complete() {
            self.run_hooks(options, current.is_some(), &mut outcome.failures);
        }
        Ok(outcome)
    }

    /// Record, cut over, then prune, halting at the first failing step.
    #[instrument(skip_all, fields(host = %self.host(), release = release_id))]
    pub fn finish_deploy(
        &self,
        release_id: &str,
        options: &CleanupOptions,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome> {
        let path = self.existing_release_path(release_id)?;
        self.fs.append_line(&self.layout.record_file, &path)?;
        self.fs.replace_link(&self.layout.current_link, &path)?;
        info!(target = %path, "recorded release and switched current");

        let options = CleanupOptions {
            in_progress: Some(release_id.to_string()),
            ..options.clone()
        };
        let cleanup = self.cleanup(&options, now)?;
        Ok(FinishOutcome {
            release: path,
            cleanup,
        })
    }

    fn read_markers(&self, releases: &[String]) -> Result<BTreeMap<String, KeepUntilMarker>> {
        let mut markers = BTreeMap::new();
        for release in releases {
            let entries = self.fs.list_dir(&self.layout.release_path(release))?;
            let scan = scan_markers(&entries);
            for name in &scan.malformed {
                warn!(release = %release, marker = %name, "ignoring malformed keep-until marker");
            }
            if let Some(marker) = scan.marker {
                markers.insert(release.clone(), marker);
            }
        }
        Ok(markers)
    }

    fn run_hooks(&self, options: &CleanupOptions, has_current: bool, failures: &mut Vec<StepFailure>) {
        for command in &options.post_commands {
            let script = format!("cd {} && {command}", quote(&self.layout.releases_dir));
            if let Err(err) = self.fs.exec(&script) {
                warn!(command = %command, error = %err, "post-cleanup command failed");
                failures.push(StepFailure {
                    step: format!("post command `{command}`"),
                    reason: err.to_string(),
                });
            }
        }

        let Some(gc) = options.gc_command.as_deref().filter(|gc| !gc.trim().is_empty()) else {
            return;
        };
        if !has_current {
            return;
        }
        // Detached so a slow gc never holds the cleanup pass open.
        let script = format!(
            "cd {} && nohup {gc} </dev/null >/dev/null 2>&1 &",
            quote(&self.layout.current_link)
        );
        if let Err(err) = self.fs.exec(&script) {
            warn!(error = %err, "failed to schedule garbage collection");
            failures.push(StepFailure {
                step: "schedule gc".to_string(),
                reason: err.to_string(),
            });
        }
    }

    fn release_path(&self, release_id: &str) -> Result<String> {
        if !is_valid_release_id(release_id) {
            return Err(LifecycleError::ReleaseNotFound {
                host: self.host().to_string(),
                path: release_id.to_string(),
            });
        }
        Ok(self.layout.release_path(release_id))
    }

    fn existing_release_path(&self, release_id: &str) -> Result<String> {
        let path = self.release_path(release_id)?;
        if !self.fs.is_dir(&path)? {
            return Err(LifecycleError::ReleaseNotFound {
                host: self.host().to_string(),
                path,
            });
        }
        Ok(path)
    }

    fn record_error(&self, err: RecordError) -> LifecycleError {
        let host = self.host().to_string();
        match err {
            RecordError::Empty => LifecycleError::EmptyRecord { host },
            RecordError::InsufficientHistory { entries } => {
                LifecycleError::InsufficientHistory { host, entries }
            }
        }
    }
}
