//! Common test utilities for integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test fixture with a host tree, a staging root and a fake runtime.
///
/// Layout of `host`:
///
/// ```text
/// host/
///   web/index.html
///   web/css/site.css
///   conf/app.toml
/// ```
pub struct TestFixture {
    pub host: TempDir,
    pub tmp: TempDir,
    pub runtime: FakeRuntime,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_runtime(FakeRuntime::new(0, None))
    }

    pub fn with_runtime(runtime: FakeRuntime) -> Self {
        let host = TempDir::new().expect("Failed to create temp host dir");
        fs::create_dir_all(host.path().join("web/css")).expect("Failed to create directory");
        fs::create_dir_all(host.path().join("conf")).expect("Failed to create directory");
        fs::write(host.path().join("web/index.html"), "<h1>hi</h1>").expect("Failed to write file");
        fs::write(host.path().join("web/css/site.css"), "body {}").expect("Failed to write file");
        fs::write(host.path().join("conf/app.toml"), "debug = false").expect("Failed to write file");

        Self {
            host,
            tmp: TempDir::new().expect("Failed to create temp staging dir"),
            runtime,
        }
    }

    /// `NAME=<host>/<rel>` argument for `--volume`.
    pub fn volume_arg(&self, name: &str, rel: &str) -> String {
        format!("{}={}", name, self.host.path().join(rel).display())
    }

    /// A `vstage` command wired to the fake runtime and staging root.
    pub fn vstage(&self) -> Command {
        let mut cmd = self.vstage_without_runtime();
        cmd.arg("--runtime").arg(self.runtime.program());
        cmd
    }

    /// A `vstage` command using the staging root but no `--runtime`.
    pub fn vstage_without_runtime(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("vstage");
        cmd.env_remove("VSTAGE_RUNTIME")
            .env_remove("RUST_LOG")
            .arg("--tmpdir")
            .arg(self.tmp.path());
        cmd
    }

    /// Number of entries left in the staging root.
    pub fn leftover_staging_dirs(&self) -> usize {
        fs::read_dir(self.tmp.path())
            .expect("Failed to read staging root")
            .count()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime stand-in script.
///
/// Every invocation is appended to a log. `cp SRC NAME:/mnt/VOL` copies SRC
/// into `<dir>/volumes/mnt/VOL`; copies into `fail_volume` exit with status
/// 3 instead. `container create` exits with `create_status`.
pub struct FakeRuntime {
    dir: TempDir,
}

impl FakeRuntime {
    pub fn new(create_status: i32, fail_volume: Option<&str>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp runtime dir");
        let log = dir.path().join("calls.log");
        let root = dir.path().join("volumes");
        let fail_volume = fail_volume.unwrap_or("");
        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  container) exit {create_status} ;;
  cp)
    target="${{3#*:}}"
    if [ -n "{fail_volume}" ] && [ "$target" = "/mnt/{fail_volume}" ]; then exit 3; fi
    mkdir -p "{root}$target" && cp -R "$2" "{root}$target"
    ;;
  rm) exit 0 ;;
esac
"#,
            log = log.display(),
            root = root.display(),
        );
        let path = dir.path().join("runtime");
        fs::write(&path, script).expect("Failed to write fake runtime");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake runtime executable");
        Self { dir }
    }

    pub fn program(&self) -> PathBuf {
        self.dir.path().join("runtime")
    }

    /// Every recorded invocation, one line per call.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Where the contents of volume `name` ended up.
    pub fn volume(&self, name: &str) -> PathBuf {
        self.dir.path().join("volumes/mnt").join(name)
    }
}

/// Permission bits of `path`.
pub fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).expect("Failed to stat").permissions().mode() & 0o777
}
