//! Secure erasure of staging directories.
//!
//! A plain `remove_dir_all` leaves file content recoverable on the
//! underlying device. Staging directories often sit on a shared temp
//! filesystem, so every regular file in them is shredded before the tree is
//! removed.

use crate::error::{Error, Result};
use crate::options::StagingOptions;
use crate::process;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Shred every regular file under `path`, then remove the tree.
///
/// Directories are first given owner `rwx`, top-down, so a restrictive
/// directory mode left by staging cannot hide files from the walk or block
/// their removal. The shred program (`options.shred_program`) is run once, as
/// `shred -f -u <extra_flags> -- FILES...`. When there are no files the
/// shred call is skipped but the tree is still removed. Symlinks are never
/// handed to the shredder, so their targets are left alone.
///
/// # Errors
///
/// Returns [`Error::CommandFailed`] if the shredder exits non-zero, or an
/// IO error if the walk or the removal fails.
pub fn shred_dir(path: &Path, extra_flags: &[String], options: &StagingOptions) -> Result<()> {
    open_up_dirs(path)?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(path).follow_links(false).follow_root_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    if !files.is_empty() {
        options.verbose(&format!(
            "shredding {} files under {}",
            files.len(),
            path.display()
        ));
        process::run(
            Command::new(&options.shred_program)
                .arg("-f")
                .arg("-u")
                .args(extra_flags)
                .arg("--")
                .args(&files),
        )?;
    }

    fs::remove_dir_all(path).map_err(|e| Error::io(path, e))
}

/// Add owner `rwx` to every directory under `path` before reading it.
fn open_up_dirs(path: &Path) -> Result<()> {
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let meta = fs::symlink_metadata(&dir).map_err(|e| Error::io(&dir, e))?;
        if !meta.is_dir() {
            continue;
        }
        let mode = meta.permissions().mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode | 0o700))
                .map_err(|e| Error::io(&dir, e))?;
        }
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| Error::io(entry.path(), e))?
                .is_dir();
            if is_dir {
                pending.push(entry.path());
            }
        }
    }
    Ok(())
}
