//! Rendering of fleet reports for the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::marker::KeepUntilMarker;
use crate::exit_codes;
use crate::fleet::FleetReport;
use crate::host::{CleanupOutcome, FinishOutcome};

/// One-line, human-readable description of a per-host success value.
pub trait HostSummary {
    fn summary(&self) -> String;

    /// Whether the host finished everything it set out to do.
    fn is_complete(&self) -> bool {
        true
    }
}

impl HostSummary for String {
    fn summary(&self) -> String {
        self.clone()
    }
}

impl HostSummary for usize {
    fn summary(&self) -> String {
        self.to_string()
    }
}

impl HostSummary for bool {
    fn summary(&self) -> String {
        let text = if *self { "yes" } else { "no" };
        text.to_string()
    }
}

impl HostSummary for KeepUntilMarker {
    fn summary(&self) -> String {
        format!("held until {}", self.expiry.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl HostSummary for CleanupOutcome {
    fn summary(&self) -> String {
        let mut line = self.summary.clone();
        if self.dry_run {
            line.push_str(" [dry run]");
        }
        if !self.removed.is_empty() {
            line.push_str(&format!("; removed {}", self.removed.join(", ")));
        }
        for failure in &self.failures {
            line.push_str(&format!("; {} failed: {}", failure.step, failure.reason));
        }
        line
    }

    fn is_complete(&self) -> bool {
        CleanupOutcome::is_complete(self)
    }
}

impl HostSummary for FinishOutcome {
    fn summary(&self) -> String {
        format!("current -> {}; {}", self.release, self.cleanup.summary())
    }

    fn is_complete(&self) -> bool {
        self.cleanup.is_complete()
    }
}

/// `host: value` per line, then a tally.
pub fn render_text<T: HostSummary>(report: &FleetReport<T>) -> String {
    let mut out = String::new();
    for result in &report.results {
        match &result.outcome {
            Ok(value) => out.push_str(&format!("{}: {}\n", result.host, value.summary())),
            Err(err) => out.push_str(&format!("{}: FAILED {}\n", result.host, error_text(err))),
        }
    }
    let ok = report.succeeded().count();
    out.push_str(&format!("{ok}/{} hosts succeeded", report.results.len()));
    out
}

/// Machine-readable report: `{"ok": bool, "hosts": [...]}`.
pub fn render_json<T: Serialize + HostSummary>(report: &FleetReport<T>) -> Result<String> {
    let mut hosts = Vec::with_capacity(report.results.len());
    for result in &report.results {
        let entry = match &result.outcome {
            Ok(value) => json!({
                "host": result.host,
                "ok": value.is_complete(),
                "result": serde_json::to_value(value).context("serialize host result")?,
            }),
            Err(err) => json!({
                "host": result.host,
                "ok": false,
                "error": { "kind": err.kind(), "message": error_text(err) },
            }),
        };
        hosts.push(entry);
    }
    let doc: Value = json!({ "ok": is_success(report), "hosts": hosts });
    serde_json::to_string_pretty(&doc).context("serialize report")
}

/// Every host succeeded and none left work unfinished.
pub fn is_success<T: HostSummary>(report: &FleetReport<T>) -> bool {
    report.all_ok() && report.succeeded().all(|(_, value)| value.is_complete())
}

pub fn exit_code<T: HostSummary>(report: &FleetReport<T>) -> i32 {
    if is_success(report) {
        exit_codes::OK
    } else {
        exit_codes::HOST_FAILURE
    }
}

/// Error message without the `host: ` prefix the line already carries.
fn error_text(err: &crate::error::LifecycleError) -> String {
    let text = err.to_string();
    let prefix = format!("{}: ", err.host());
    text.strip_prefix(&prefix).map_or(text.clone(), str::to_string)
}
