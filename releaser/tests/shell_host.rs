//! Shell transport against real directories.
//!
//! Every host is a sibling directory in a temp dir and commands run through
//! `sh` exactly as they would over ssh.

use std::fs;
use std::io::Write;
use std::time::Duration;

use chrono::Utc;

use releaser::core::marker::is_marker_file;
use releaser::error::LifecycleError;
use releaser::fleet::Fleet;
use releaser::io::remote::RemoteFs;
use releaser::io::shell::{LocalRunner, ShellHost};
use releaser::test_support::LocalFleet;

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn local_host(name: &str) -> ShellHost<LocalRunner> {
    ShellHost::new(
        name,
        LocalRunner {
            sudo_user: None,
            timeout: Duration::from_secs(30),
            output_limit_bytes: 1 << 20,
        },
    )
}

#[test]
fn remote_fs_primitives_on_local_disk() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("with space");
    let base = base.to_str().expect("utf-8 path");
    let host = local_host("box");

    let dir = format!("{base}/releases/r1");
    let file = format!("{base}/RELEASES.txt");
    let link = format!("{base}/current");

    assert!(!host.is_dir(&dir).expect("exists"));
    assert!(host.read_lines(&file).expect("missing file").is_empty());
    assert!(host.list_dir(&dir).expect("missing dir").is_empty());
    assert_eq!(host.read_link(&link).expect("no link"), None);

    host.make_dir(&dir).expect("mkdir");
    assert!(host.is_dir(&dir).expect("exists"));

    host.append_line(&file, "first").expect("append");
    host.append_line(&file, "it's second").expect("append");
    assert_eq!(
        host.read_lines(&file).expect("read"),
        vec!["first", "it's second"]
    );
    host.delete_last_line(&file).expect("delete last");
    assert_eq!(host.read_lines(&file).expect("read"), vec!["first"]);

    host.replace_link(&link, &dir).expect("link");
    assert_eq!(host.read_link(&link).expect("read link").as_deref(), Some(dir.as_str()));

    host.touch(&format!("{dir}/marker")).expect("touch");
    assert_eq!(host.list_dir(&dir).expect("list"), vec!["marker"]);

    host.remove_tree(&dir).expect("rm");
    assert!(!host.is_dir(&dir).expect("exists"));
    assert_eq!(host.exec("printf hi").expect("exec"), "hi");
}

#[test]
fn failing_command_is_an_execution_error() {
    let host = local_host("box");
    let err = host.exec("echo nope >&2; exit 7").expect_err("exit 7");
    match err {
        LifecycleError::Execution { host, reason } => {
            assert_eq!(host, "box");
            assert!(reason.contains("exited with 7"), "{reason}");
            assert!(reason.contains("nope"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn timed_out_command_is_never_success() {
    let host = ShellHost::new(
        "box",
        LocalRunner {
            sudo_user: None,
            timeout: Duration::from_millis(100),
            output_limit_bytes: 1024,
        },
    );
    let err = host.exec("sleep 5").expect_err("timeout");
    assert_eq!(err.kind(), "execution");
    assert!(err.to_string().contains("timed out"));
}

#[test]
fn replace_link_switches_existing_link() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().to_str().expect("utf-8 path");
    let host = local_host("box");
    let link = format!("{base}/current");
    for id in ["r1", "r2"] {
        host.make_dir(&format!("{base}/{id}")).expect("mkdir");
    }

    host.replace_link(&link, &format!("{base}/r1")).expect("first");
    host.replace_link(&link, &format!("{base}/r2")).expect("second");

    let target = fs::read_link(temp.path().join("current")).expect("read link");
    assert_eq!(target, temp.path().join("r2"));
    assert!(!temp.path().join("current.releaser-next").exists());
    // The link was replaced, not followed into the old target.
    assert!(!temp.path().join("r1").join("r2").exists());
}

#[test]
fn fleet_lifecycle_over_local_shell() {
    let local = LocalFleet::new(&["web1", "web2"]).expect("fleet");
    let fleet = Fleet::new(local.connector(), local.config.clone());
    let targets = hosts(&["web1", "web2"]);
    let now = Utc::now();

    for id in ["r1", "r2", "r3", "r4", "r5"] {
        assert!(fleet.create_release(&targets, id).all_ok());
        assert!(fleet.record_success(&targets, id).all_ok());
    }
    assert!(fleet.promote_to_current(&targets, "r5").all_ok());
    assert!(fleet.mark_keep_until(&targets, "r1", 3, now).all_ok());

    let report = fleet.cleanup(&targets, &fleet.cleanup_options(), now);
    assert!(report.all_ok());
    for (host, outcome) in report.succeeded() {
        assert_eq!(outcome.removed, vec!["r2"], "{host}");
    }

    let web1 = local.host_root("web1");
    assert!(!web1.join("releases/r2").exists());
    assert!(web1.join("releases/r1").exists());
    let markers: Vec<_> = fs::read_dir(web1.join("releases/r1"))
        .expect("read r1")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|name| is_marker_file(name))
        .collect();
    assert_eq!(markers.len(), 1);

    let record = fs::read_to_string(web1.join("RELEASES.txt")).expect("record");
    assert_eq!(record.lines().count(), 5);
    assert!(record.lines().all(|line| line.starts_with(web1.to_str().expect("utf-8"))));
    assert_eq!(
        fs::read_link(web1.join("current")).expect("current"),
        web1.join("releases/r5")
    );
}

#[test]
fn record_failure_removes_entry_before_trailing_blank_lines() {
    let local = LocalFleet::new(&["web1"]).expect("fleet");
    let fleet = Fleet::new(local.connector(), local.config.clone());
    let targets = hosts(&["web1"]);
    for id in ["r1", "r2"] {
        assert!(fleet.create_release(&targets, id).all_ok());
        assert!(fleet.record_success(&targets, id).all_ok());
    }
    let record_file = local.host_root("web1").join("RELEASES.txt");
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&record_file)
        .expect("open record");
    file.write_all(b"\n  \n").expect("append blanks");
    drop(file);

    let host = fleet.host("web1");
    let dropped = host.record_failure().expect("drop r2");
    assert!(dropped.ends_with("/releases/r2"), "{dropped}");

    let record = host.record().expect("record");
    assert_eq!(record.count(), 1);
    assert!(record.contains("r1"));
    assert!(!record.contains("r2"));
    let text = fs::read_to_string(&record_file).expect("read record");
    assert_eq!(text.lines().count(), 1, "{text:?}");
    assert!(!local.host_root("web1").join("RELEASES.txt.releaser-tmp").exists());
}

#[test]
fn cutover_refuses_plain_file_named_like_a_release() {
    let local = LocalFleet::new(&["web1"]).expect("fleet");
    let fleet = Fleet::new(local.connector(), local.config.clone());
    let targets = hosts(&["web1"]);
    assert!(fleet.create_release(&targets, "r1").all_ok());
    assert!(fleet.promote_to_current(&targets, "r1").all_ok());
    let releases = local.host_root("web1").join("releases");
    fs::write(releases.join("r2"), "not a release").expect("write file");

    let report = fleet.promote_to_current(&targets, "r2");
    assert!(matches!(
        report.get("web1"),
        Some(Err(LifecycleError::ReleaseNotFound { .. }))
    ));
    assert_eq!(fleet.release_exists(&targets, "r2").get("web1").cloned(), Some(Ok(false)));
    assert_eq!(
        fs::read_link(local.host_root("web1").join("current")).expect("current"),
        releases.join("r1")
    );
}

#[test]
fn cutover_to_missing_release_leaves_link_alone() {
    let local = LocalFleet::new(&["web1"]).expect("fleet");
    let fleet = Fleet::new(local.connector(), local.config.clone());
    let targets = hosts(&["web1"]);
    assert!(fleet.create_release(&targets, "r1").all_ok());
    assert!(fleet.promote_to_current(&targets, "r1").all_ok());

    let report = fleet.promote_to_current(&targets, "r9");
    assert!(report.is_total_failure());
    assert!(matches!(
        report.get("web1"),
        Some(Err(LifecycleError::ReleaseNotFound { .. }))
    ));
    assert_eq!(
        fs::read_link(local.host_root("web1").join("current")).expect("current"),
        local.host_root("web1").join("releases/r1")
    );
}
