//! Transfer of staged directories into named container volumes.
//!
//! The pipeline is: stage every volume, create one ephemeral container with
//! all volumes mounted, copy each staged directory into its mount point with
//! one `<runtime> cp` per volume running concurrently, remove the
//! container, then shred every temporary staging directory.
//!
//! The container is created but never started; `cp` into the stopped
//! container writes through its mounts.

use crate::error::{Error, Result, chain_cleanup};
use crate::node::CopyNode;
use crate::options::TransferOptions;
use crate::process;
use crate::stage::{Staging, VolDir, VolumeMap, validate_volume_name};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use uuid::Uuid;

/// One entry of a volume's source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A bare host path, copied as-is without metadata overrides
    Path(PathBuf),
    /// A fully specified copy tree
    Node(CopyNode),
}

impl Source {
    /// Turn this source into a copy tree, validating bare paths.
    pub fn into_node(self) -> Result<CopyNode> {
        match self {
            Source::Path(path) => CopyNode::new(path),
            Source::Node(node) => Ok(node),
        }
    }
}

impl From<CopyNode> for Source {
    fn from(node: CopyNode) -> Self {
        Source::Node(node)
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

/// Build a [`VolumeMap`] from per-volume source lists.
///
/// Sources listed twice for the same volume collapse into one root.
///
/// # Errors
///
/// Returns [`Error::InvalidVolumeName`] for a name that cannot be used as a
/// mount target, or the construction error of a bare path source.
pub fn normalize_volumes<K, V, S>(volumes: impl IntoIterator<Item = (K, V)>) -> Result<VolumeMap>
where
    K: Into<String>,
    V: IntoIterator<Item = S>,
    S: Into<Source>,
{
    let mut map = VolumeMap::new();
    for (name, sources) in volumes {
        let name = name.into();
        validate_volume_name(&name)?;
        let roots = map.entry(name).or_default();
        for source in sources {
            roots.insert(source.into().into_node()?);
        }
    }
    Ok(map)
}

/// Copy host paths or copy trees into named volumes.
///
/// Bare paths are wrapped into override-free copy trees, then the whole
/// mapping goes through [`transfer`].
///
/// # Example
///
/// ```no_run
/// use volstage::{CopyNode, Source, TransferOptions, copy_to_volume};
///
/// let config = CopyNode::builder("/srv/app/config")
///     .default_file_perms("600")
///     .build()?;
///
/// copy_to_volume(
///     [
///         ("static", vec![Source::from("/srv/app/static")]),
///         ("config", vec![Source::from(config)]),
///     ],
///     &TransferOptions::new("busybox"),
/// )?;
/// # Ok::<(), volstage::Error>(())
/// ```
pub fn copy_to_volume<K, V, S>(
    volumes: impl IntoIterator<Item = (K, V)>,
    options: &TransferOptions,
) -> Result<()>
where
    K: Into<String>,
    V: IntoIterator<Item = S>,
    S: Into<Source>,
{
    let map = normalize_volumes(volumes)?;
    transfer(&map, options)
}

/// Stage `volumes` and copy them into their container volumes.
///
/// Every temporary staging directory is shredded before this returns,
/// whichever step failed. If no volume has anything to copy, no container
/// is created.
///
/// # Errors
///
/// - [`Error::Staging`] if a volume could not be staged
/// - [`Error::CommandFailed`] if the container could not be created
/// - [`Error::Transfer`] if any copy exited non-zero
/// - [`Error::Cleanup`] if removing the container or shredding a staging
///   directory failed, with the triggering error in
///   [`Error::original`]
pub fn transfer(volumes: &VolumeMap, options: &TransferOptions) -> Result<()> {
    let mut staging = Staging::new(options.staging.clone());
    let outcome = staging
        .stage(volumes)
        .and_then(|()| transfer_staged(staging.dirs(), options));
    staging.erase_after(outcome)
}

fn transfer_staged(dirs: &[VolDir], options: &TransferOptions) -> Result<()> {
    if dirs.is_empty() {
        options.staging.verbose("nothing to transfer");
        return Ok(());
    }

    let container = Uuid::new_v4().to_string();
    create_container(&container, dirs, options)?;

    let copied = copy_into(&container, dirs, options);

    options
        .staging
        .verbose(&format!("removing container {container}"));
    let removed = process::run(Command::new(&options.runtime).arg("rm").arg(&container));
    chain_cleanup(Path::new(&container), copied, removed)
}

fn create_container(name: &str, dirs: &[VolDir], options: &TransferOptions) -> Result<()> {
    let mut cmd = Command::new(&options.runtime);
    cmd.args(["container", "create", "--rm", "--name", name]);
    for dir in dirs {
        let mut mount = dir.path.clone().into_os_string();
        mount.push(":");
        mount.push(options.mount_point(&dir.name));
        cmd.arg("-v").arg(mount);
    }
    cmd.args(&options.create_flags).arg(&options.image);

    options.staging.verbose(&format!(
        "creating container {} from {} with {} volumes",
        name,
        options.image,
        dirs.len()
    ));
    process::run(&mut cmd)
}

/// Run one `cp` per staged directory concurrently and wait for all of them.
fn copy_into(container: &str, dirs: &[VolDir], options: &TransferOptions) -> Result<()> {
    let mut running: Vec<(&VolDir, Child)> = Vec::with_capacity(dirs.len());
    let mut launch_error = None;

    for dir in dirs {
        let mut contents: OsString = dir.path.clone().into_os_string();
        contents.push("/.");
        let target = format!("{}:{}", container, options.mount_point(&dir.name));

        let mut cmd = Command::new(&options.runtime);
        cmd.arg("cp").arg(contents).arg(target);
        match process::spawn(&mut cmd) {
            Ok(child) => running.push((dir, child)),
            Err(e) => {
                launch_error = Some(e);
                break;
            }
        }
    }

    let total = dirs.len();
    let mut failed = 0;
    let mut worst_status = 0;
    for (dir, mut child) in running {
        match child.wait() {
            Ok(status) if status.success() => {
                options
                    .staging
                    .verbose(&format!("copied {} into volume {}", dir.path.display(), dir.name));
            }
            Ok(status) => {
                failed += 1;
                worst_status = worst_status.max(process::severity(status));
                options
                    .staging
                    .warn(&format!("copy into volume {} exited with {}", dir.name, status));
            }
            Err(e) => {
                failed += 1;
                worst_status = worst_status.max(1);
                options
                    .staging
                    .warn(&format!("failed to wait for copy into volume {}: {}", dir.name, e));
            }
        }
    }

    if let Some(e) = launch_error {
        return Err(e);
    }
    if failed > 0 {
        return Err(Error::Transfer {
            failed,
            total,
            worst_status,
        });
    }
    Ok(())
}
