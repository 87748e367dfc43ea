//! Error handling integration tests for vstage CLI.
//!
//! Construction and usage errors exit with 2, runtime failures with 1, and
//! staging directories never outlive the command.

#[path = "../common/mod.rs"]
mod common;

use common::{FakeRuntime, TestFixture};
use predicates::prelude::*;

#[test]
fn test_missing_source_exits_2() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--volume")
        .arg(fx.volume_arg("site", "missing"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));

    assert!(fx.runtime.calls().is_empty());
}

#[test]
fn test_malformed_volume_exits_2() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--volume")
        .arg("no-separator")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("NAME=PATH"));

    fx.vstage()
        .arg("--volume")
        .arg(format!("bad/name={}", fx.host.path().display()))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid volume name"));

    fx.vstage()
        .arg("--dry-run")
        .arg("--volume")
        .arg(format!("bad:name={}", fx.host.path().display()))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid volume name"));
    assert_eq!(fx.leftover_staging_dirs(), 0);
    assert!(fx.runtime.calls().is_empty());
}

#[test]
fn test_invalid_mode_exits_2() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--file-mode=--")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("valid argument to UNIX chmod"));
}

#[test]
fn test_unknown_user_exits_2() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--owner")
        .arg("volstage-no-such-user")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown user"));
}

#[test]
fn test_absolute_subdir_exits_2() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--subdir")
        .arg("/etc")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be an absolute path"));
}

#[test]
fn test_failed_copy_exits_1_and_cleans_up() {
    let fx = TestFixture::with_runtime(FakeRuntime::new(0, Some("site")));

    fx.vstage()
        .arg("--file-mode")
        .arg("640")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .arg("--volume")
        .arg(fx.volume_arg("cfg", "conf"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("1 of 2 volumes"))
        .stderr(predicate::str::contains("worst exit status 3"));

    let calls = fx.runtime.calls();
    assert!(calls.last().unwrap().starts_with("rm "));
    assert!(fx.runtime.volume("cfg/conf/app.toml").exists());
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_failed_create_exits_1_and_cleans_up() {
    let fx = TestFixture::with_runtime(FakeRuntime::new(125, None));

    fx.vstage()
        .arg("--dir-mode")
        .arg("755")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("exited with"));

    assert_eq!(fx.runtime.calls().len(), 1);
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_missing_runtime_exits_1() {
    let fx = TestFixture::new();

    fx.vstage_without_runtime()
        .arg("--runtime")
        .arg("volstage-no-such-runtime")
        .arg("--file-mode")
        .arg("600")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to run volstage-no-such-runtime"));

    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_bad_chmod_mode_fails_staging() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--file-mode")
        .arg("not-a-mode")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to stage volume site"));

    assert!(fx.runtime.calls().is_empty());
    assert_eq!(fx.leftover_staging_dirs(), 0);
}
