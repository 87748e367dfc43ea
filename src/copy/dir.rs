//! Deep copy of one host directory into a staging directory.
//!
//! The source tree is listed once, the directory skeleton is created, file
//! contents are copied on a rayon pool and symlinks are recreated verbatim.
//! Source modes and times are put on the new directories last, deepest
//! first, so a read-only source directory never blocks writes into its copy.

use crate::error::{Error, Result};
use crate::options::StagingOptions;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use super::file::copy_file;
use super::utils::{DirEntry, is_escaping_symlink, preserve_symlink_timestamps, preserve_timestamps};

/// Statistics from copying trees into staging directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Regular files copied
    pub files_copied: u64,
    /// Symlinks recreated
    pub symlinks_copied: u64,
    /// Directories created, the tree root included
    pub dirs_created: u64,
    /// File content bytes copied
    pub bytes_copied: u64,
    /// Wall time spent copying
    pub duration: Duration,
}

impl CopyStats {
    /// Add another tree's statistics to these.
    pub fn merge(&mut self, other: &CopyStats) {
        self.files_copied += other.files_copied;
        self.symlinks_copied += other.symlinks_copied;
        self.dirs_created += other.dirs_created;
        self.bytes_copied += other.bytes_copied;
        self.duration += other.duration;
    }
}

/// Source/destination pairs of one tree, grouped by entry kind.
///
/// `dirs` is in walk order, so every parent precedes its children.
#[derive(Default)]
struct Listing {
    dirs: Vec<DirEntry>,
    files: Vec<DirEntry>,
    symlinks: Vec<DirEntry>,
}

impl Listing {
    fn of(src: &Path, dst: &Path, options: &StagingOptions) -> Result<Self> {
        let mut listing = Listing::default();
        let walk = WalkDir::new(src)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walk {
            let entry = entry?;
            let dst_path = match entry.path().strip_prefix(src) {
                Ok(relative) if !relative.as_os_str().is_empty() => dst.join(relative),
                _ => dst.to_path_buf(),
            };
            let pair = DirEntry {
                src: entry.path().to_path_buf(),
                dst: dst_path,
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                listing.symlinks.push(pair);
            } else if file_type.is_dir() {
                listing.dirs.push(pair);
            } else if file_type.is_file() {
                listing.files.push(pair);
            } else {
                options.warn(&format!("Skipping special file: {}", entry.path().display()));
            }
        }
        Ok(listing)
    }
}

/// Copy the directory `src` to the new path `dst`.
///
/// # Errors
///
/// - [`Error::PathIo`] if `src` is not a directory
/// - [`Error::AlreadyExists`] if `dst` exists
/// - [`Error::PartialCopy`] / [`Error::PartialSymlinks`] if any entry failed;
///   each failure is also reported through the warn handler
pub(crate) fn copy_dir(src: &Path, dst: &Path, options: &StagingOptions) -> Result<CopyStats> {
    let started = Instant::now();

    let src_meta = fs::symlink_metadata(src).map_err(|e| Error::io(src, e))?;
    if !src_meta.is_dir() {
        return Err(Error::io(
            src,
            io::Error::new(io::ErrorKind::NotADirectory, "expected a directory"),
        ));
    }
    if fs::symlink_metadata(dst).is_ok() {
        return Err(Error::AlreadyExists(dst.to_path_buf()));
    }

    let listing = Listing::of(src, dst, options)?;

    for dir in &listing.dirs {
        fs::create_dir(&dir.dst).map_err(|e| Error::io(&dir.dst, e))?;
    }

    let (files_copied, bytes_copied) = copy_files(&listing.files, options)?;
    let symlinks_copied = copy_symlinks(&listing.symlinks, options)?;
    finish_dirs(&listing.dirs, options)?;

    Ok(CopyStats {
        files_copied,
        symlinks_copied,
        dirs_created: listing.dirs.len() as u64,
        bytes_copied,
        duration: started.elapsed(),
    })
}

/// Copy every file on a pool of `options.parallel` threads.
fn copy_files(files: &[DirEntry], options: &StagingOptions) -> Result<(u64, u64)> {
    if files.is_empty() {
        return Ok((0, 0));
    }

    let run = || -> Vec<Option<u64>> {
        files
            .par_iter()
            .map(|entry| match copy_file(&entry.src, &entry.dst, options) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    options.warn(&format!("Failed to copy {}: {}", entry.src.display(), e));
                    None
                }
            })
            .collect()
    };

    let results = if options.parallel == rayon::current_num_threads() {
        run()
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallel)
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                options.warn(&format!("Falling back to the global thread pool: {e}"));
                run()
            }
        }
    };

    let failed = results.iter().filter(|r| r.is_none()).count();
    if failed > 0 {
        return Err(Error::PartialCopy {
            failed,
            total: files.len(),
        });
    }
    let bytes = results.into_iter().flatten().sum();
    Ok((files.len() as u64, bytes))
}

fn copy_symlinks(links: &[DirEntry], options: &StagingOptions) -> Result<u64> {
    let mut failed = 0;
    for link in links {
        if let Err(e) = copy_symlink(&link.src, &link.dst, options) {
            options.warn(&format!("Failed to copy symlink {}: {}", link.src.display(), e));
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(Error::PartialSymlinks {
            failed,
            total: links.len(),
        });
    }
    Ok(links.len() as u64)
}

/// Give each new directory its source's mode and times, deepest first.
fn finish_dirs(dirs: &[DirEntry], options: &StagingOptions) -> Result<()> {
    for dir in dirs.iter().rev() {
        let meta = fs::metadata(&dir.src).map_err(|e| Error::io(&dir.src, e))?;
        fs::set_permissions(&dir.dst, meta.permissions()).map_err(|e| Error::io(&dir.dst, e))?;
        if let Err(e) = preserve_timestamps(&meta, &dir.dst) {
            options.warn(&format!(
                "Failed to preserve timestamps on {}: {}",
                dir.dst.display(),
                e
            ));
        }
    }
    Ok(())
}

/// Recreate the symlink `src` at `dst` with the same target.
pub(crate) fn copy_symlink(src: &Path, dst: &Path, options: &StagingOptions) -> Result<()> {
    let target: PathBuf = fs::read_link(src).map_err(|e| Error::io(src, e))?;
    if target.is_relative() && is_escaping_symlink(&target) {
        options.warn(&format!(
            "Symlink {} points outside its tree via {}",
            src.display(),
            target.display()
        ));
    }
    symlink(&target, dst).map_err(|e| Error::io(dst, e))?;

    let preserved =
        fs::symlink_metadata(src).and_then(|meta| preserve_symlink_timestamps(&meta, dst));
    if let Err(e) = preserved {
        options.warn(&format!(
            "Failed to preserve timestamps on {}: {}",
            dst.display(),
            e
        ));
    }
    Ok(())
}
