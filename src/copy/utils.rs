//! Low-level helpers shared by the file and directory copiers.

use filetime::{FileTime, set_file_times, set_symlink_file_times};
use std::fs::{File, Metadata};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

/// Largest single `copy_file_range` request.
#[cfg(target_os = "linux")]
const RANGE_CHUNK: u64 = 128 * 1024 * 1024;

/// Copy `len` bytes from `src` to `dst`, both at their current offsets.
///
/// Linux moves the bytes in-kernel with `copy_file_range(2)`; elsewhere, or
/// when the filesystem refuses before the first byte, a buffered copy runs.
pub(crate) fn copy_file_contents(src: &File, dst: &File, len: u64) -> io::Result<u64> {
    #[cfg(target_os = "linux")]
    if let Some(copied) = copy_in_kernel(src, dst, len)? {
        return Ok(copied);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = len;

    io::copy(&mut BufReader::new(src), &mut &*dst)
}

/// `Ok(None)` means the kernel path is unavailable for this pair of files.
#[cfg(target_os = "linux")]
fn copy_in_kernel(src: &File, dst: &File, len: u64) -> io::Result<Option<u64>> {
    use std::os::unix::io::AsRawFd;

    let mut copied: u64 = 0;
    while copied < len {
        let request = (len - copied).min(RANGE_CHUNK) as usize;
        // SAFETY: both descriptors stay open for the call; null offsets use
        // and advance the file positions
        let n = unsafe {
            libc::copy_file_range(
                src.as_raw_fd(),
                std::ptr::null_mut(),
                dst.as_raw_fd(),
                std::ptr::null_mut(),
                request,
                0,
            )
        };

        match n {
            // Source shrank under us
            0 => break,
            n if n > 0 => copied += n as u64,
            _ => {
                let err = io::Error::last_os_error();
                let unsupported = matches!(
                    err.raw_os_error(),
                    Some(libc::EXDEV | libc::ENOSYS | libc::EINVAL | libc::EOPNOTSUPP)
                );
                if copied == 0 && unsupported {
                    return Ok(None);
                }
                return Err(err);
            }
        }
    }
    Ok(Some(copied))
}

/// Whether a link target climbs out through a `..` component.
pub(crate) fn is_escaping_symlink(target: &Path) -> bool {
    target.components().any(|c| c == Component::ParentDir)
}

/// A directory to create in the staging tree, with the source it mirrors.
pub(crate) struct DirEntry {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Give `dst` the access and modification times recorded in `src_meta`.
pub(crate) fn preserve_timestamps(src_meta: &Metadata, dst: &Path) -> io::Result<()> {
    let (atime, mtime) = times_of(src_meta);
    set_file_times(dst, atime, mtime)
}

/// Same as [`preserve_timestamps`], on the link itself rather than its target.
pub(crate) fn preserve_symlink_timestamps(src_meta: &Metadata, dst: &Path) -> io::Result<()> {
    let (atime, mtime) = times_of(src_meta);
    set_symlink_file_times(dst, atime, mtime)
}

fn times_of(meta: &Metadata) -> (FileTime, FileTime) {
    (
        FileTime::from_last_access_time(meta),
        FileTime::from_last_modification_time(meta),
    )
}
