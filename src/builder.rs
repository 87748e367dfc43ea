//! Builder API for ergonomic volume population.
//!
//! The builder collects a volume mapping and transfer options, then runs the
//! whole stage/copy/erase pipeline. This is often more convenient than
//! building a [`VolumeMap`](crate::VolumeMap) and [`TransferOptions`] by hand.
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```no_run
//! use volstage::VolumeCopy;
//!
//! // Copy two host directories into the "site" volume
//! VolumeCopy::new("busybox")
//!     .volume("site", ["/srv/site/public", "/srv/site/assets"])
//!     .run()?;
//! # Ok::<(), volstage::Error>(())
//! ```
//!
//! ## With Overrides
//!
//! ```no_run
//! use volstage::{CopyNode, VolumeCopy};
//!
//! let secrets = CopyNode::builder("/etc/app/secrets")
//!     .default_user_owner(1000)
//!     .default_file_perms("400")
//!     .subdir("run")
//!     .build()?;
//!
//! VolumeCopy::new("busybox")
//!     .node("secrets", secrets)
//!     .runtime("podman")
//!     .shred_flag("-z")
//!     .run()?;
//! # Ok::<(), volstage::Error>(())
//! ```

use crate::error::Result;
use crate::node::CopyNode;
use crate::options::TransferOptions;
use crate::stage::{VolumePlan, plan};
use crate::transfer::{Source, normalize_volumes, transfer};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A builder for populating container volumes.
///
/// Sources are validated when [`run`](VolumeCopy::run) or
/// [`plan`](VolumeCopy::plan) is called, not when they are added.
///
/// # Example
///
/// ```no_run
/// use volstage::VolumeCopy;
///
/// VolumeCopy::new("hello-world")
///     .volume("data", ["/var/lib/app/data"])
///     .temp_root("/var/tmp")
///     .run()?;
/// # Ok::<(), volstage::Error>(())
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct VolumeCopy {
    volumes: BTreeMap<String, Vec<Source>>,
    options: TransferOptions,
}

impl VolumeCopy {
    /// Create a builder whose ephemeral container uses `image`.
    ///
    /// The image is never run, so any pullable image works.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            volumes: BTreeMap::new(),
            options: TransferOptions::new(image),
        }
    }

    /// Create a builder from existing transfer options.
    pub fn with_options(options: TransferOptions) -> Self {
        Self {
            volumes: BTreeMap::new(),
            options,
        }
    }

    /// Add sources to the volume `name`.
    ///
    /// May be called repeatedly for the same volume.
    pub fn volume<S: Into<Source>>(
        mut self,
        name: impl Into<String>,
        sources: impl IntoIterator<Item = S>,
    ) -> Self {
        self.volumes
            .entry(name.into())
            .or_default()
            .extend(sources.into_iter().map(Into::into));
        self
    }

    /// Add one copy tree to the volume `name`.
    pub fn node(self, name: impl Into<String>, node: CopyNode) -> Self {
        self.volume(name, [node])
    }

    /// Use a different container runtime executable (default: `docker`).
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.options = self.options.with_runtime(runtime);
        self
    }

    /// Create staging directories under `root`.
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.options.staging = self.options.staging.with_temp_root(root);
        self
    }

    /// Append an extra flag for the secure-delete call.
    pub fn shred_flag(mut self, flag: impl Into<String>) -> Self {
        self.options.staging = self.options.staging.with_shred_flag(flag);
        self
    }

    /// Append several extra flags for the secure-delete call.
    pub fn shred_flags<S: Into<String>>(mut self, flags: impl IntoIterator<Item = S>) -> Self {
        for flag in flags {
            self.options.staging = self.options.staging.with_shred_flag(flag);
        }
        self
    }

    /// Append an extra `container create` flag.
    pub fn create_flag(mut self, flag: impl Into<String>) -> Self {
        self.options = self.options.with_create_flag(flag);
        self
    }

    /// Set the number of parallel file copies within one tree.
    pub fn parallel(mut self, n: usize) -> Self {
        self.options.staging = self.options.staging.with_parallel(n);
        self
    }

    /// Set a warning handler.
    pub fn on_warn(mut self, handler: fn(&str)) -> Self {
        self.options.staging = self.options.staging.with_warn_handler(handler);
        self
    }

    /// Set a handler for per-step progress messages.
    pub fn on_verbose(mut self, handler: fn(&str)) -> Self {
        self.options.staging = self.options.staging.with_verbose_handler(handler);
        self
    }

    /// The transfer options collected so far.
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Describe how each volume would be staged, without copying anything.
    pub fn plan(&self) -> Result<Vec<VolumePlan>> {
        let map = normalize_volumes(self.volumes.clone())?;
        Ok(plan(&map))
    }

    /// Stage, transfer and erase.
    ///
    /// See [`transfer`](crate::transfer) for the error cases.
    pub fn run(self) -> Result<()> {
        let map = normalize_volumes(self.volumes)?;
        transfer(&map, &self.options)
    }
}
