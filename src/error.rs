//! Error types for volstage.
//!
//! This module provides the [`Error`] enum containing all possible errors
//! that can occur while building copy trees, staging them and transferring
//! them into volumes, and the [`Result`] type alias.
//!
//! # Error Categories
//!
//! | Category | Errors |
//! |----------|--------|
//! | Construction | [`Error::SourceNotFound`], [`Error::FileWithChildren`], [`Error::AbsoluteSubdir`], [`Error::ChildOutsideParent`], [`Error::ChildThroughSymlink`], [`Error::InvalidVolumeName`], [`Error::InvalidPermissions`], [`Error::UnknownUser`], [`Error::UnknownGroup`], [`Error::IdentityLookup`] |
//! | IO | [`Error::Io`], [`Error::PathIo`], [`Error::Walk`], [`Error::TempFile`], [`Error::Persist`] |
//! | Copy | [`Error::AlreadyExists`], [`Error::StagedSymlink`], [`Error::PartialCopy`], [`Error::PartialSymlinks`] |
//! | Process | [`Error::Spawn`], [`Error::CommandFailed`] |
//! | Pipeline | [`Error::Staging`], [`Error::Transfer`], [`Error::Cleanup`] |

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

/// Result type for volstage operations.
///
/// This is a type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while staging and transferring copy trees.
///
/// All errors include relevant path, program or volume information to aid
/// debugging. Pipeline errors wrap the error that caused them; use
/// [`std::error::Error::source`] to walk the chain.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// IO error on a specific path
    #[error("IO error on {path}: {source}")]
    PathIo {
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Error while walking a directory tree
    #[error("Failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// Source path does not exist
    #[error("Source path does not exist: {0}")]
    SourceNotFound(PathBuf),

    /// A plain file was given children
    #[error("Cannot have any children if file itself: {0}")]
    FileWithChildren(PathBuf),

    /// The relocation subdirectory is absolute or climbs out with `..`
    #[error("Subdirectory {0} cannot be an absolute path or contain '..'")]
    AbsoluteSubdir(PathBuf),

    /// A child path does not lie inside its parent's path
    #[error("Child {child} is not inside parent {parent}")]
    ChildOutsideParent {
        /// The parent node's path
        parent: PathBuf,
        /// The offending child path
        child: PathBuf,
    },

    /// A child path reaches below its parent through a symlink
    #[error("Child {child} passes through symlink {link}")]
    ChildThroughSymlink {
        /// The symlink on the way to the child
        link: PathBuf,
        /// The offending child path
        child: PathBuf,
    },

    /// Volume name unusable as a mount target
    #[error("Invalid volume name {0:?}")]
    InvalidVolumeName(String),

    /// Permission override is not a usable `chmod` mode
    #[error("{0:?} must be a valid argument to UNIX chmod")]
    InvalidPermissions(String),

    /// User name not present in the host identity database
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Group name not present in the host identity database
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// Identity database lookup failed
    #[error("Failed to look up {name}: {source}")]
    IdentityLookup {
        /// The user or group name being resolved
        name: String,
        /// Underlying error
        source: nix::Error,
    },

    /// A path inside a staging directory is a symlink where a directory
    /// was expected
    #[error("Refusing to follow symlink inside staging directory: {0}")]
    StagedSymlink(PathBuf),

    /// Destination already exists
    #[error("Destination already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Failed to create temporary file
    #[error("Failed to create temporary file in {path}: {source}")]
    TempFile {
        /// Directory where temp file creation was attempted
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Failed to persist temporary file
    #[error("Failed to persist temporary file to {path}: {source}")]
    Persist {
        /// Target path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Failed to copy one or more files
    #[error("Failed to copy {failed} of {total} files")]
    PartialCopy {
        /// Number of files that failed to copy
        failed: usize,
        /// Total number of files
        total: usize,
    },

    /// Failed to copy one or more symlinks
    #[error("Failed to copy {failed} of {total} symlinks")]
    PartialSymlinks {
        /// Number of symlinks that failed to copy
        failed: usize,
        /// Total number of symlinks
        total: usize,
    },

    /// External program could not be started
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        source: io::Error,
    },

    /// External program exited unsuccessfully
    #[error("{program} exited with {status}")]
    CommandFailed {
        /// Program name and subcommand
        program: String,
        /// Exit status reported by the OS
        status: ExitStatus,
    },

    /// Preparing a volume's staging directory failed
    ///
    /// The volume's temporary directory has already been shredded when this
    /// error is returned.
    #[error("Failed to stage volume {volume}: {source}")]
    Staging {
        /// Volume being staged
        volume: String,
        /// What went wrong
        source: Box<Error>,
    },

    /// One or more per-volume transfer processes exited non-zero
    ///
    /// Returned only after the ephemeral container has been removed.
    #[error("Copy into container failed for {failed} of {total} volumes (worst exit status {worst_status})")]
    Transfer {
        /// Number of transfers that failed
        failed: usize,
        /// Number of transfers launched
        total: usize,
        /// Maximum exit status observed
        worst_status: i32,
    },

    /// Cleanup after an operation failed
    ///
    /// `original` holds the error that triggered the cleanup, if any.
    #[error("Cleanup of {path} failed: {source}{}", original_suffix(.original))]
    Cleanup {
        /// Directory or container being cleaned up
        path: PathBuf,
        /// The cleanup failure
        source: Box<Error>,
        /// The error that was being propagated when cleanup ran
        original: Option<Box<Error>>,
    },
}

fn original_suffix(original: &Option<Box<Error>>) -> String {
    match original {
        Some(err) => format!(" (while handling: {err})"),
        None => String::new(),
    }
}

impl Error {
    /// Attach a path to an IO error.
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::PathIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns `true` for errors raised while constructing a [`CopyNode`](crate::CopyNode)
    /// or validating a volume mapping.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Error::SourceNotFound(_)
                | Error::FileWithChildren(_)
                | Error::AbsoluteSubdir(_)
                | Error::ChildOutsideParent { .. }
                | Error::ChildThroughSymlink { .. }
                | Error::InvalidVolumeName(_)
                | Error::InvalidPermissions(_)
                | Error::UnknownUser(_)
                | Error::UnknownGroup(_)
                | Error::IdentityLookup { .. }
        )
    }

    /// The error that was being handled when a cleanup failed.
    pub fn original(&self) -> Option<&Error> {
        match self {
            Error::Cleanup { original, .. } => original.as_deref(),
            _ => None,
        }
    }
}

/// Combine an operation's outcome with the outcome of the cleanup that
/// followed it.
///
/// A cleanup failure always wins, with the operation's error (if any) kept
/// as [`Error::Cleanup::original`].
pub(crate) fn chain_cleanup(path: &Path, outcome: Result<()>, cleanup: Result<()>) -> Result<()> {
    match (outcome, cleanup) {
        (outcome, Ok(())) => outcome,
        (Ok(()), Err(e)) => Err(Error::Cleanup {
            path: path.to_path_buf(),
            source: Box::new(e),
            original: None,
        }),
        (Err(original), Err(e)) => Err(Error::Cleanup {
            path: path.to_path_buf(),
            source: Box::new(e),
            original: Some(Box::new(original)),
        }),
    }
}
