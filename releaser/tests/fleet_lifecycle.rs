//! Multi-host lifecycle scenarios through the fleet API.
//!
//! Uses the in-memory fleet so partial failures can be injected per host.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use releaser::core::release_id::ReleaseOrdering;
use releaser::core::retention::{AbortReason, Verdict};
use releaser::error::LifecycleError;
use releaser::fleet::Fleet;
use releaser::host::CleanupOptions;
use releaser::io::config::FleetConfig;
use releaser::io::remote::{HostConnector, RemoteFs};
use releaser::test_support::MemoryFleet;

const ROOT: &str = "/srv/app";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn fleet(memory: &MemoryFleet) -> Fleet<MemoryFleet> {
    let mut config = FleetConfig::default();
    config.paths.root = ROOT.to_string();
    config.cleanup.gc_command = String::new();
    Fleet::new(memory.clone(), config)
}

fn release_dir(id: &str) -> String {
    format!("{ROOT}/releases/{id}")
}

fn options(in_progress: Option<&str>) -> CleanupOptions {
    CleanupOptions {
        ordering: ReleaseOrdering::Listing,
        in_progress: in_progress.map(str::to_string),
        ..CleanupOptions::default()
    }
}

/// Releases r1..r5 on disk, current -> r4, the given ids recorded.
fn seed(fleet: &Fleet<MemoryFleet>, targets: &[String], recorded: &[&str]) {
    for id in ["r1", "r2", "r3", "r4", "r5"] {
        assert!(fleet.create_release(targets, id).all_ok());
    }
    for id in recorded {
        assert!(fleet.record_success(targets, id).all_ok());
    }
    assert!(fleet.promote_to_current(targets, "r4").all_ok());
}

#[test]
fn cleanup_prunes_beyond_keep_on_every_host() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1", "web2"]);
    seed(&fleet, &targets, &["r1", "r2", "r3", "r4"]);

    let report = fleet.cleanup(&targets, &options(Some("r5")), now());
    assert!(report.all_ok());
    for (host, outcome) in report.succeeded() {
        assert_eq!(outcome.removed, vec!["r1"], "{host}");
        assert_eq!(outcome.plan.valid_count, 4);
        let state = memory.state(host);
        assert!(!state.exists(&release_dir("r1")));
        for kept in ["r2", "r3", "r4", "r5"] {
            assert!(state.exists(&release_dir(kept)), "{host} lost {kept}");
        }
    }
}

#[test]
fn short_history_aborts_without_touching_disk() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1"]);
    seed(&fleet, &targets, &["r1"]);

    let report = fleet.cleanup(&targets, &options(Some("r5")), now());
    let outcome = report
        .get("web1")
        .and_then(|r| r.as_ref().ok())
        .expect("web1 outcome");
    assert_eq!(outcome.aborted, Some(AbortReason::InsufficientValidReleases));
    assert!(outcome.summary.contains("insufficient valid releases"));
    assert!(outcome.summary.contains("valid 2/3"));
    assert!(outcome.removed.is_empty());
    for id in ["r1", "r2", "r3", "r4", "r5"] {
        assert!(memory.state("web1").exists(&release_dir(id)));
    }
}

#[test]
fn keep_until_marker_holds_release_through_cleanup() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1"]);
    seed(&fleet, &targets, &["r1", "r2", "r3", "r4"]);

    let marks = fleet.mark_keep_until(&targets, "r2", 5, now());
    let marker = *marks.succeeded().next().expect("marked").1;
    assert_eq!(marker.expiry, now() + TimeDelta::days(5));

    let report = fleet.cleanup(&targets, &options(Some("r5")), now());
    let (_, outcome) = report.succeeded().next().expect("cleanup ok");
    assert_eq!(outcome.removed, vec!["r1"]);
    assert!(memory.state("web1").exists(&release_dir("r2")));
}

#[test]
fn expired_marker_makes_unrecorded_release_eligible() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1"]);
    seed(&fleet, &targets, &["r1", "r3", "r4"]);
    assert!(fleet.mark_keep_until(&targets, "r2", 5, now()).all_ok());

    let host = fleet.host("web1");
    let outcome = host.cleanup(&options(Some("r5")), now()).expect("cleanup");
    let r2 = outcome
        .plan
        .verdicts
        .iter()
        .find(|v| v.release == "r2")
        .expect("r2 classified");
    assert!(matches!(r2.verdict, Verdict::Held { .. }));
    assert!(outcome.removed.is_empty());

    let later = now() + TimeDelta::days(6);
    let outcome = host.cleanup(&options(Some("r5")), later).expect("cleanup");
    assert_eq!(outcome.removed, vec!["r2"]);
    assert!(!memory.state("web1").exists(&release_dir("r2")));
}

#[test]
fn record_failure_before_cleanup_unconfirms_release() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1"]);
    seed(&fleet, &targets, &["r1", "r2"]);

    let report = fleet.record_failure(&targets);
    assert_eq!(report.get("web1").cloned(), Some(Ok(release_dir("r2"))));
    assert!(fleet.record_failure(&targets).all_ok());

    let report = fleet.record_failure(&targets);
    assert_eq!(
        report.get("web1").cloned(),
        Some(Err(LifecycleError::EmptyRecord {
            host: "web1".to_string()
        }))
    );
}

#[test]
fn partial_cutover_is_reported_per_host() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1", "web2", "web3"]);
    assert!(fleet.create_release(&targets, "r1").all_ok());
    assert!(fleet.promote_to_current(&targets, "r1").all_ok());
    assert!(fleet.create_release(&hosts(&["web1", "web3"]), "r2").all_ok());

    let report = fleet.promote_to_current(&targets, "r2");
    assert!(!report.all_ok());
    assert!(!report.is_total_failure());
    assert!(matches!(
        report.get("web2"),
        Some(Err(LifecycleError::ReleaseNotFound { .. }))
    ));

    assert_eq!(
        fleet.host("web1").current_release().expect("web1"),
        Some("r2".to_string())
    );
    assert_eq!(
        fleet.host("web2").current_release().expect("web2"),
        Some("r1".to_string())
    );
}

#[test]
fn unreachable_host_is_an_execution_error_not_a_no_op() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1", "web2"]);
    seed(&fleet, &targets, &["r1", "r2", "r3", "r4"]);
    memory.set_unreachable("web2", true);

    let report = fleet.cleanup(&targets, &options(Some("r5")), now());
    assert!(report.get("web1").is_some_and(|r| r.is_ok()));
    assert_eq!(report.failed().next().map(LifecycleError::kind), Some("execution"));

    memory.set_unreachable("web2", false);
    assert!(memory.state("web2").exists(&release_dir("r1")));
}

#[test]
fn finish_deploy_records_promotes_and_prunes() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1", "web2"]);
    seed(&fleet, &targets, &["r1", "r2", "r3", "r4"]);
    memory.fail_path("web2", &format!("{ROOT}/current"));

    let report = fleet.finish_deploy(&targets, "r5", &options(None), now());

    let web1 = report
        .get("web1")
        .and_then(|r| r.as_ref().ok())
        .expect("web1 finished");
    assert_eq!(web1.release, release_dir("r5"));
    assert_eq!(web1.cleanup.removed, vec!["r2", "r1"]);
    assert_eq!(fleet.host("web1").current_release().expect("current").as_deref(), Some("r5"));

    // Cutover failed on web2, so its pass stopped before any pruning.
    assert!(report.get("web2").is_some_and(|r| r.is_err()));
    let web2 = memory.state("web2");
    assert!(web2.exists(&release_dir("r1")));
    assert_eq!(fleet.host("web2").current_release().expect("current").as_deref(), Some("r4"));
}

#[test]
fn previous_count_and_exists_fan_out() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1", "web2"]);
    assert!(fleet.create_release(&targets, "r1").all_ok());
    assert!(fleet.record_success(&targets, "r1").all_ok());
    assert!(fleet.record_success(&hosts(&["web1"]), "r2").all_ok());

    let previous = fleet.previous_release(&targets);
    assert_eq!(previous.get("web1").cloned(), Some(Ok(release_dir("r1"))));
    assert!(matches!(
        previous.get("web2"),
        Some(Err(LifecycleError::InsufficientHistory { entries: 1, .. }))
    ));

    let counts = fleet.release_count(&targets);
    assert_eq!(counts.get("web1").cloned(), Some(Ok(2)));
    assert_eq!(counts.get("web2").cloned(), Some(Ok(1)));

    let exists = fleet.release_exists(&targets, "r2");
    assert_eq!(exists.get("web1").cloned(), Some(Ok(false)));
}

#[test]
fn malformed_marker_does_not_protect_release() {
    let memory = MemoryFleet::new();
    let fleet = fleet(&memory);
    let targets = hosts(&["web1"]);
    seed(&fleet, &targets, &["r2", "r3", "r4"]);
    memory
        .connect("web1")
        .touch(&format!("{}/KEEP_UNTIL__notadate", release_dir("r1")))
        .expect("touch");

    let report = fleet.cleanup(&targets, &options(Some("r5")), now());
    let (_, outcome) = report.succeeded().next().expect("cleanup ok");
    assert_eq!(outcome.removed, vec!["r1"]);
}
