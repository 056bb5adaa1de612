//! Fan-out of per-host lifecycle operations across a host set.
//!
//! Hosts share no mutable state, so each one runs on its own scoped thread
//! and a failure on one never stops the others. Results come back as one
//! entry per host, in the order the hosts were given.

use std::thread;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use crate::core::marker::KeepUntilMarker;
use crate::error::{LifecycleError, Result};
use crate::host::{CleanupOptions, CleanupOutcome, FinishOutcome, HostLifecycle};
use crate::io::config::FleetConfig;
use crate::io::remote::HostConnector;

/// Outcome of one operation on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResult<T> {
    pub host: String,
    pub outcome: Result<T>,
}

/// Per-host results of a fleet operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport<T> {
    pub results: Vec<HostResult<T>>,
}

impl<T> FleetReport<T> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok().map(|value| (r.host.as_str(), value)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &LifecycleError> {
        self.results.iter().filter_map(|r| r.outcome.as_ref().err())
    }

    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }

    /// Every host failed (and there was at least one).
    pub fn is_total_failure(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.outcome.is_err())
    }

    pub fn get(&self, host: &str) -> Option<&Result<T>> {
        self.results
            .iter()
            .find(|r| r.host == host)
            .map(|r| &r.outcome)
    }
}

/// Lifecycle operations over any set of hosts reachable through `C`.
#[derive(Debug)]
pub struct Fleet<C> {
    connector: C,
    config: FleetConfig,
}

impl<C: HostConnector> Fleet<C> {
    pub fn new(connector: C, config: FleetConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn host(&self, host: &str) -> HostLifecycle<C::Host> {
        HostLifecycle::new(self.connector.connect(host), self.config.layout(host))
    }

    /// Cleanup options carrying the configured policy and hooks.
    pub fn cleanup_options(&self) -> CleanupOptions {
        let gc = &self.config.cleanup.gc_command;
        CleanupOptions {
            keep: self.config.keep,
            ordering: self.config.ordering,
            in_progress: None,
            dry_run: false,
            post_commands: self.config.cleanup.post_commands.clone(),
            gc_command: (!gc.trim().is_empty()).then(|| gc.clone()),
        }
    }

    /// Run `op` once per host, concurrently, collecting every outcome.
    ///
    /// A worker that panics is reported as an execution error for its host.
    pub fn fan_out<T, Op>(&self, hosts: &[String], op: Op) -> FleetReport<T>
    where
        T: Send,
        Op: Fn(&HostLifecycle<C::Host>) -> Result<T> + Sync,
    {
        let op = &op;
        let results = thread::scope(|scope| {
            let workers: Vec<_> = hosts
                .iter()
                .map(|host| (host, scope.spawn(move || op(&self.host(host)))))
                .collect();
            workers
                .into_iter()
                .map(|(host, worker)| {
                    let outcome = worker.join().unwrap_or_else(|_| {
                        Err(LifecycleError::execution(host, "worker panicked"))
                    });
                    if let Err(err) = &outcome {
                        warn!(host = %host, error = %err, "host operation failed");
                    }
                    HostResult {
                        host: host.clone(),
                        outcome,
                    }
                })
                .collect()
        });
        FleetReport { results }
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), release = release_id))]
    pub fn create_release(&self, hosts: &[String], release_id: &str) -> FleetReport<String> {
        self.fan_out(hosts, |host| host.create_release(release_id))
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), release = release_id))]
    pub fn record_success(&self, hosts: &[String], release_id: &str) -> FleetReport<String> {
        self.fan_out(hosts, |host| host.record_success(release_id))
    }

    #[instrument(skip_all, fields(hosts = hosts.len()))]
    pub fn record_failure(&self, hosts: &[String]) -> FleetReport<String> {
        self.fan_out(hosts, HostLifecycle::record_failure)
    }

    /// Repoint current on every host. Cutover is per host; a partial fleet
    /// cutover shows up as mixed results.
    #[instrument(skip_all, fields(hosts = hosts.len(), release = release_id))]
    pub fn promote_to_current(&self, hosts: &[String], release_id: &str) -> FleetReport<String> {
        self.fan_out(hosts, |host| host.set_current(release_id))
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), keep = options.keep))]
    pub fn cleanup(
        &self,
        hosts: &[String],
        options: &CleanupOptions,
        now: DateTime<Utc>,
    ) -> FleetReport<CleanupOutcome> {
        self.fan_out(hosts, |host| host.cleanup(options, now))
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), release = release_id, days = days))]
    pub fn mark_keep_until(
        &self,
        hosts: &[String],
        release_id: &str,
        days: u16,
        now: DateTime<Utc>,
    ) -> FleetReport<KeepUntilMarker> {
        self.fan_out(hosts, |host| host.mark_keep_until(release_id, days, now))
    }

    pub fn previous_release(&self, hosts: &[String]) -> FleetReport<String> {
        self.fan_out(hosts, HostLifecycle::previous_release)
    }

    pub fn release_count(&self, hosts: &[String]) -> FleetReport<usize> {
        self.fan_out(hosts, HostLifecycle::release_count)
    }

    pub fn release_exists(&self, hosts: &[String], release_id: &str) -> FleetReport<bool> {
        self.fan_out(hosts, |host| host.release_exists(release_id))
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), release = release_id))]
    pub fn finish_deploy(
        &self,
        hosts: &[String],
        release_id: &str,
        options: &CleanupOptions,
        now: DateTime<Utc>,
    ) -> FleetReport<FinishOutcome> {
        self.fan_out(hosts, |host| host.finish_deploy(release_id, options, now))
    }
}
