//! Basic functionality integration tests for vstage CLI.

#[path = "../common/mod.rs"]
mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{FakeRuntime, TestFixture, mode_of};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_plain_volume_is_mounted_in_place() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Populated 1 volume(s)"));

    // The whole shared parent is mounted, so web/ lands inside the volume
    assert_eq!(
        fs::read_to_string(fx.runtime.volume("site/web/index.html")).unwrap(),
        "<h1>hi</h1>"
    );
    assert_eq!(fx.leftover_staging_dirs(), 0);

    let calls = fx.runtime.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("container create --rm --name "));
    assert!(calls[0].ends_with(" hello-world"));
    assert!(calls[1].starts_with(&format!("cp {}/.", fx.host.path().display())));
    assert!(calls[2].starts_with("rm "));
}

#[test]
fn test_file_mode_forces_staging() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--quiet")
        .arg("--file-mode")
        .arg("600")
        .arg("--dir-mode")
        .arg("750")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .success()
        .stderr(predicate::str::is_empty());

    let web = fx.runtime.volume("site/web");
    assert_eq!(mode_of(&web.join("index.html")), 0o600);
    assert_eq!(mode_of(&web.join("css/site.css")), 0o600);
    assert_eq!(mode_of(&web.join("css")), 0o750);
    assert!(!fx.runtime.volume("site/conf").exists());

    // The host tree is untouched and staging left nothing behind
    assert_ne!(mode_of(&fx.host.path().join("web/index.html")), 0o600);
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_subdir_relocates_into_volume() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--subdir")
        .arg("etc/app")
        .arg("--volume")
        .arg(fx.volume_arg("cfg", "conf"))
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(fx.runtime.volume("cfg/etc/app/conf/app.toml")).unwrap(),
        "debug = false"
    );
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_multiple_volumes_share_one_container() {
    let fx = TestFixture::new();

    fx.vstage()
        .arg("--image")
        .arg("busybox")
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .arg("--volume")
        .arg(fx.volume_arg("cfg", "conf"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Populated 2 volume(s)"));

    let calls = fx.runtime.calls();
    let creates = calls.iter().filter(|c| c.starts_with("container create")).count();
    let copies = calls.iter().filter(|c| c.starts_with("cp ")).count();
    assert_eq!((creates, copies), (1, 2));
    assert!(calls[0].contains(":/mnt/cfg -v "));
    assert!(calls[0].contains(":/mnt/site busybox"));
}

#[test]
fn test_same_volume_distinct_parents_is_staged() {
    let fx = TestFixture::new();
    let other = tempfile::TempDir::new().unwrap();
    fs::write(other.path().join("extra.txt"), "extra").unwrap();

    fx.vstage()
        .arg("--volume")
        .arg(fx.volume_arg("mixed", "conf"))
        .arg("--volume")
        .arg(format!("mixed={}", other.path().join("extra.txt").display()))
        .assert()
        .success();

    let volume = fx.runtime.volume("mixed");
    assert!(volume.join("conf/app.toml").exists());
    assert_eq!(fs::read_to_string(volume.join("extra.txt")).unwrap(), "extra");
    assert!(!volume.join("web").exists());
    assert_eq!(fx.leftover_staging_dirs(), 0);
}

#[test]
fn test_runtime_from_environment() {
    let fx = TestFixture::new();
    let runtime = FakeRuntime::new(0, None);

    fx.vstage_without_runtime()
        .env("VSTAGE_RUNTIME", runtime.program())
        .arg("--volume")
        .arg(fx.volume_arg("site", "web"))
        .assert()
        .success();

    assert_eq!(runtime.calls().len(), 3);
    assert!(fx.runtime.calls().is_empty());
}

#[test]
fn test_help() {
    let mut cmd = cargo_bin_cmd!("vstage");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--volume"))
        .stdout(predicate::str::contains("--dry-run"));
}
