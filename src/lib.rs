//! # volstage
//!
//! Populate named container volumes from host directory trees, with
//! per-subtree owner, group and permission overrides.
//!
//! ## Core Features
//!
//! - **Copy trees**: [`CopyNode`] describes a host path, the subtrees under it
//!   and the metadata each should receive, with nearest-definition-wins
//!   inheritance
//! - **Zero-copy when possible**: volumes whose roots share one parent and
//!   need no rewriting are mounted in place
//! - **Atomic staging**: other volumes are deep-copied into a private
//!   temporary directory, in parallel, with temp file + rename writes
//! - **Relocation**: any subtree can be moved under a relative subdirectory
//!   inside its volume
//! - **Single container**: all volumes are populated through one ephemeral,
//!   never-started container, one concurrent `cp` per volume
//! - **Secure erase**: staging directories are shredded on every exit path
//!
//! ## Quick Start
//!
//! ```no_run
//! use volstage::{CopyNode, VolumeCopy};
//!
//! let private = CopyNode::builder("/srv/app/private")
//!     .default_file_perms("600")
//!     .default_dir_perms("700")
//!     .build()?;
//!
//! VolumeCopy::new("busybox")
//!     .volume("public", ["/srv/app/public"])
//!     .node("private", private)
//!     .run()?;
//! # Ok::<(), volstage::Error>(())
//! ```
//!
//! ## Function API
//!
//! ```no_run
//! use volstage::{Source, TransferOptions, copy_to_volume};
//!
//! let options = TransferOptions::new("busybox").with_runtime("podman");
//! copy_to_volume([("data", vec![Source::from("/srv/data")])], &options)?;
//! # Ok::<(), volstage::Error>(())
//! ```
//!
//! The building blocks are public too: [`get_dirs`] stages a
//! [`VolumeMap`] without transferring it, [`set_metadata`] applies a tree's
//! overrides to a copy, and [`shred_dir`] securely removes a directory.
//!
//! ## Host Requirements
//!
//! `chmod` and `shred` must be on `PATH`, along with the container runtime
//! CLI (`docker` by default). Changing owners usually requires root.
//!
//! ## Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tracing` | Structured logging with tracing crate |
//! | `serde` | Serialize/Deserialize for the option types |
//! | `full` | Enable all optional features |

#![cfg_attr(docsrs, feature(doc_cfg))]

mod analyze;
mod builder;
mod copy;
mod error;
mod metadata;
mod node;
mod options;
mod process;
mod shred;
mod stage;
mod transfer;

pub use builder::VolumeCopy;
pub use copy::{CopyStats, copy_tree};
pub use error::{Error, Result};
pub use metadata::{Overrides, set_metadata};
pub use node::{CopyNode, CopyNodeBuilder, Owner};
pub use options::{StagingOptions, TransferOptions};
pub use shred::shred_dir;
pub use stage::{Staging, VolDir, VolumeMap, VolumePlan, get_dirs, plan};
pub use transfer::{Source, copy_to_volume, normalize_volumes, transfer};
