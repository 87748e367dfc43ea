//! Deep-copy of host trees into staging directories.
//!
//! This module copies what a [`CopyNode`](crate::CopyNode) points at, file or
//! directory, with atomic file writes and parallel file operations.

mod dir;
mod file;
mod utils;

use crate::error::{Error, Result};
use crate::options::StagingOptions;
use std::fs;
use std::path::Path;
use std::time::Instant;

pub use dir::CopyStats;

/// Copy `src` (a directory, file or symlink) to the new path `dst`.
///
/// A symlink `src` is copied as the file or directory it points at, and
/// only recreated as a link when it dangles or points at a special file.
/// Symlinks below a directory `src` are always recreated as links.
///
/// `dst` must not exist; its parent must.
pub fn copy_tree(src: &Path, dst: &Path, options: &StagingOptions) -> Result<CopyStats> {
    let meta = fs::symlink_metadata(src).map_err(|e| Error::io(src, e))?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        return dir::copy_dir(src, dst, options);
    }

    let start = Instant::now();
    let mut stats = CopyStats::default();
    let target = if file_type.is_symlink() {
        fs::metadata(src).ok()
    } else {
        None
    };
    match target {
        Some(target) if target.is_dir() => {
            let resolved = fs::canonicalize(src).map_err(|e| Error::io(src, e))?;
            return dir::copy_dir(&resolved, dst, options);
        }
        Some(target) if target.is_file() => {
            stats.bytes_copied = file::copy_file(src, dst, options)?;
            stats.files_copied = 1;
        }
        _ if file_type.is_symlink() => {
            dir::copy_symlink(src, dst, options)?;
            stats.symlinks_copied = 1;
        }
        _ => {
            stats.bytes_copied = file::copy_file(src, dst, options)?;
            stats.files_copied = 1;
        }
    }
    stats.duration = start.elapsed();
    Ok(stats)
}
