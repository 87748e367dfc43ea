//! Applying cascading ownership and permission overrides to a staged copy.
//!
//! The walk runs in two passes over the node tree. The first moves every
//! relocated node (one with a `subdir`) to its final place; the second
//! applies ownership and then permissions, top-down, so a node's own
//! override is applied after (and therefore wins over) its ancestors'.

use crate::error::{Error, Result};
use crate::node::CopyNode;
use crate::options::StagingOptions;
use crate::process;
use std::fs;
use std::os::unix::fs::lchown;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Metadata overrides in effect at one point of the tree.
///
/// A node's non-null fields replace the inherited ones for the node and
/// every descendant; see [`Overrides::inherit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Effective uid
    pub user: Option<u32>,
    /// Effective gid
    pub group: Option<u32>,
    /// Effective `chmod` mode for files
    pub file_perms: Option<String>,
    /// Effective `chmod` mode for directories
    pub dir_perms: Option<String>,
}

impl Overrides {
    /// The overrides in effect at `node`, given those inherited from its parent.
    pub fn inherit(&self, node: &CopyNode) -> Overrides {
        Overrides {
            user: node.default_user_owner().or(self.user),
            group: node.default_group_owner().or(self.group),
            file_perms: node
                .default_file_perms()
                .map(str::to_string)
                .or_else(|| self.file_perms.clone()),
            dir_perms: node
                .default_dir_perms()
                .map(str::to_string)
                .or_else(|| self.dir_perms.clone()),
        }
    }

    fn sets_owner(&self) -> bool {
        self.user.is_some() || self.group.is_some()
    }
}

/// Apply `node`'s metadata overrides to its already-made copy.
///
/// With `parent_root` unset, `node` is a staged root whose copy is
/// `output_root/<basename>`; it is not relocated, since the stager already
/// copied it under its `subdir`. With `parent_root` set, the copy mirrors
/// the source at `output_root/<path relative to parent_root>`.
///
/// Errors from `lchown` or `chmod` abort the walk immediately.
pub fn set_metadata(
    node: &CopyNode,
    output_root: &Path,
    parent_root: Option<&Path>,
    inherited: &Overrides,
    options: &StagingOptions,
) -> Result<()> {
    let copy_path = match parent_root {
        None => output_root.join(node.basename()),
        Some(parent_root) => relocate(node, output_root, parent_root, options)?,
    };
    relocate_children(node, &copy_path, options)?;
    apply(node, &copy_path, inherited, options)
}

/// Move `node`'s copy to its final location and return that location.
fn relocate(
    node: &CopyNode,
    output_root: &Path,
    parent_root: &Path,
    options: &StagingOptions,
) -> Result<PathBuf> {
    let mirrored = mirrored_path(node, output_root, parent_root)?;
    ensure_no_staged_links(output_root, &mirrored)?;
    let Some(subdir) = node.subdir() else {
        return Ok(mirrored);
    };

    let target_dir = output_root.join(subdir);
    let target = target_dir.join(node.basename());
    if target == mirrored {
        return Ok(target);
    }

    ensure_no_staged_links(output_root, &target)?;
    fs::create_dir_all(&target_dir).map_err(|e| Error::io(&target_dir, e))?;
    if fs::symlink_metadata(&target).is_ok() {
        return Err(Error::AlreadyExists(target));
    }
    fs::rename(&mirrored, &target).map_err(|e| Error::io(&mirrored, e))?;
    options.verbose(&format!(
        "relocated {} -> {}",
        mirrored.display(),
        target.display()
    ));
    Ok(target)
}

fn relocate_children(node: &CopyNode, copy_path: &Path, options: &StagingOptions) -> Result<()> {
    for child in node.children() {
        let child_path = relocate(child, copy_path, node.path(), options)?;
        relocate_children(child, &child_path, options)?;
    }
    Ok(())
}

/// Where `node`'s copy ends up once every relocation has been made.
fn final_path(node: &CopyNode, output_root: &Path, parent_root: &Path) -> Result<PathBuf> {
    match node.subdir() {
        Some(subdir) => Ok(output_root.join(subdir).join(node.basename())),
        None => mirrored_path(node, output_root, parent_root),
    }
}

fn mirrored_path(node: &CopyNode, output_root: &Path, parent_root: &Path) -> Result<PathBuf> {
    let relative = node
        .path()
        .strip_prefix(parent_root)
        .map_err(|_| Error::ChildOutsideParent {
            parent: parent_root.to_path_buf(),
            child: node.path().to_path_buf(),
        })?;
    Ok(output_root.join(relative))
}

fn apply(
    node: &CopyNode,
    copy_path: &Path,
    inherited: &Overrides,
    options: &StagingOptions,
) -> Result<()> {
    let effective = inherited.inherit(node);

    // Ownership strictly before permissions
    if effective.sets_owner() {
        change_owner(copy_path, effective.user, effective.group)?;
    }
    change_perms(copy_path, &effective, options)?;

    for child in node.children() {
        let child_path = final_path(child, copy_path, node.path())?;
        ensure_no_staged_links(copy_path, &child_path)?;
        apply(child, &child_path, &effective, options)?;
    }
    Ok(())
}

/// Fail if `base`, or any directory between it and `path`, is a symlink.
///
/// Paths in the copy are built by joining host-relative components, so a
/// recreated link on the way would send the change to the link's target.
fn ensure_no_staged_links(base: &Path, path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    let between = dir.ancestors().take_while(|a| *a != base);
    for ancestor in between.chain(std::iter::once(base)) {
        if fs::symlink_metadata(ancestor).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(Error::StagedSymlink(ancestor.to_path_buf()));
        }
    }
    Ok(())
}

/// `lchown` every entry under `path`, symlinks included, without following them.
fn change_owner(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    for entry in WalkDir::new(path).follow_links(false).follow_root_links(false) {
        let entry = entry?;
        lchown(entry.path(), uid, gid).map_err(|e| Error::io(entry.path(), e))?;
    }
    Ok(())
}

fn change_perms(path: &Path, effective: &Overrides, options: &StagingOptions) -> Result<()> {
    if effective.file_perms.is_none() && effective.dir_perms.is_none() {
        return Ok(());
    }

    let meta = fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    if !meta.is_dir() {
        if let Some(mode) = &effective.file_perms {
            chmod(mode, &[path.to_path_buf()], options)?;
        }
        return Ok(());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            dirs.push(entry.into_path());
        } else if file_type.is_file() {
            files.push(entry.into_path());
        }
    }

    if let Some(mode) = &effective.file_perms {
        chmod(mode, &files, options)?;
    }
    if let Some(mode) = &effective.dir_perms {
        // Deepest first, so a mode without search permission does not cut
        // off the rest of the batch
        dirs.reverse();
        chmod(mode, &dirs, options)?;
    }
    Ok(())
}

/// One batched `chmod MODE -- PATHS...`; nothing to do for an empty batch.
fn chmod(mode: &str, paths: &[PathBuf], options: &StagingOptions) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    options.verbose(&format!("chmod {} on {} paths", mode, paths.len()));
    process::run(
        Command::new(&options.chmod_program)
            .arg(mode)
            .arg("--")
            .args(paths),
    )
}
