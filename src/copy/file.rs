//! Single file copy operations.
//!
//! Files are staged atomically: contents go to a named temp file in the
//! destination directory, which is then renamed into place with
//! `persist_noclobber`.

use crate::error::{Error, Result};
use crate::options::StagingOptions;
use std::fs::{self, File};
use std::path::Path;

use super::utils::{copy_file_contents, preserve_timestamps};

/// Copy a single regular file atomically, preserving permissions and timestamps.
///
/// Returns the number of bytes copied.
///
/// # Errors
///
/// Returns an error if:
/// - Source is a directory ([`Error::PathIo`])
/// - Destination already exists ([`Error::AlreadyExists`])
/// - Temp file creation fails ([`Error::TempFile`])
/// - Atomic rename fails ([`Error::Persist`])
pub(crate) fn copy_file(src: &Path, dst: &Path, options: &StagingOptions) -> Result<u64> {
    let src_meta = fs::metadata(src).map_err(|e| Error::io(src, e))?;
    if src_meta.is_dir() {
        return Err(Error::io(
            src,
            std::io::Error::new(std::io::ErrorKind::IsADirectory, "expected a file"),
        ));
    }

    if fs::symlink_metadata(dst).is_ok() {
        return Err(Error::AlreadyExists(dst.to_path_buf()));
    }

    let src_file = File::open(src).map_err(|e| Error::io(src, e))?;

    // Temp file must live on the destination filesystem for the rename
    let dst_parent = dst.parent().unwrap_or(Path::new("."));
    let temp_file = tempfile::NamedTempFile::new_in(dst_parent).map_err(|e| Error::TempFile {
        path: dst_parent.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = copy_file_contents(&src_file, temp_file.as_file(), src_meta.len())
        .map_err(|e| Error::io(src, e))?;

    if options.fsync {
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(temp_file.path(), e))?;
    }

    fs::set_permissions(temp_file.path(), src_meta.permissions())
        .map_err(|e| Error::io(temp_file.path(), e))?;

    match temp_file.persist_noclobber(dst) {
        Ok(_) => {}
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::AlreadyExists(dst.to_path_buf()));
        }
        Err(e) => {
            return Err(Error::Persist {
                path: dst.to_path_buf(),
                source: e.error,
            });
        }
    }

    if let Err(e) = preserve_timestamps(&src_meta, dst) {
        options.warn(&format!(
            "Failed to preserve timestamps on {}: {}",
            dst.display(),
            e
        ));
    }

    Ok(bytes_copied)
}
