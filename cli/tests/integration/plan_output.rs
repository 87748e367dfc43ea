//! Dry-run output integration tests for vstage CLI.

#[path = "../common/mod.rs"]
mod common;

use common::TestFixture;
use predicates::prelude::*;

#[test]
fn test_plan_reports_in_place_mount() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--dry-run")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .arg("--volume")
        .arg(fx.volume_arg("site", "conf"))
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "site: mount {} in place (no copy, 2 root(s))",
            fx.host.path().display()
        )));

    assert!(fx.runtime.calls().is_empty());
}

#[test]
fn test_plan_reports_staged_copy() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("-n")
        .arg("--dir-mode")
        .arg("700")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .success()
        .stdout(predicate::str::contains("site: staged copy of 1 root(s)"));

    assert!(fx.runtime.calls().is_empty());
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_plan_alias_and_order() {
    let fx = TestFixture::new();

    let output = fx
        .vstage()
        .arg("--plan")
        .arg("--volume")
        .arg(fx.volume_arg("zeta", "web"))
        .arg("--volume")
        .arg(fx.volume_arg("alpha", "conf"))
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("alpha: "));
    assert!(lines[1].starts_with("zeta: "));
}

#[test]
fn test_plan_still_validates_sources() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--dry-run")
        .arg("--volume")
        .arg(fx.volume_arg("site", "nope"))
        .assert()
        .code(2);
}
