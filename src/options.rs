//! Configuration options for staging and transfer.
//!
//! This module provides [`StagingOptions`] for configuring how copy trees are
//! staged in temporary directories, and [`TransferOptions`] for configuring the
//! container runtime used to move staged data into volumes.
//!
//! # Example
//!
//! ```
//! use volstage::{StagingOptions, TransferOptions};
//!
//! let staging = StagingOptions::default()
//!     .with_temp_root("/var/tmp")
//!     .with_shred_flag("-z");
//!
//! let options = TransferOptions::new("busybox")
//!     .with_runtime("podman")
//!     .with_staging(staging);
//! ```

use std::path::PathBuf;

/// Options for staging copy trees.
///
/// # Default Values
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `temp_root` | `None` | System temp directory |
/// | `temp_prefix` | `"volstage-"` | Prefix of staging directory names |
/// | `parallel` | 16 | Concurrent file copies per tree |
/// | `fsync` | `true` | Sync staged files to disk |
/// | `chmod_program` | `"chmod"` | Permission changer |
/// | `shred_program` | `"shred"` | Secure-delete utility |
/// | `shred_flags` | empty | Extra flags after `-f -u` |
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StagingOptions {
    /// Directory in which staging directories are created (default: system temp dir)
    pub temp_root: Option<PathBuf>,

    /// Prefix for staging directory names
    pub temp_prefix: String,

    /// Number of parallel file copy operations within one tree (default: 16)
    pub parallel: usize,

    /// Whether to sync staged files to disk after writing (default: true)
    pub fsync: bool,

    /// Program used to apply permission modes
    pub chmod_program: String,

    /// Program used to securely erase staged files
    pub shred_program: String,

    /// Extra flags passed to the shred program
    ///
    /// `-f -u` are always passed.
    pub shred_flags: Vec<String>,

    /// Callback for warnings (optional)
    ///
    /// If not set and `tracing` feature is enabled, warnings are logged via tracing.
    /// Otherwise, warnings are silently ignored.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub warn_handler: Option<fn(&str)>,

    /// Callback for per-step progress messages (optional)
    ///
    /// If not set and `tracing` feature is enabled, messages are logged at debug level.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub verbose_handler: Option<fn(&str)>,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            temp_root: None,
            temp_prefix: "volstage-".to_string(),
            parallel: 16,
            fsync: true,
            chmod_program: "chmod".to_string(),
            shred_program: "shred".to_string(),
            shred_flags: Vec::new(),
            warn_handler: None,
            verbose_handler: None,
        }
    }
}

impl StagingOptions {
    /// Create staging directories under `root` instead of the system temp dir
    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Set the staging directory name prefix
    #[must_use]
    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    /// Set the number of parallel file copies
    ///
    /// Value is clamped to at least 1 to prevent panics.
    #[must_use]
    pub fn with_parallel(mut self, n: usize) -> Self {
        self.parallel = n.max(1);
        self
    }

    /// Disable fsync for faster (but less durable) staging
    #[must_use]
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    /// Use a different `chmod` executable
    #[must_use]
    pub fn with_chmod_program(mut self, program: impl Into<String>) -> Self {
        self.chmod_program = program.into();
        self
    }

    /// Use a different secure-delete executable
    #[must_use]
    pub fn with_shred_program(mut self, program: impl Into<String>) -> Self {
        self.shred_program = program.into();
        self
    }

    /// Append an extra flag for the secure-delete call
    #[must_use]
    pub fn with_shred_flag(mut self, flag: impl Into<String>) -> Self {
        self.shred_flags.push(flag.into());
        self
    }

    /// Create options with a warning handler
    #[must_use]
    pub fn with_warn_handler(mut self, handler: fn(&str)) -> Self {
        self.warn_handler = Some(handler);
        self
    }

    /// Create options with a verbose handler
    #[must_use]
    pub fn with_verbose_handler(mut self, handler: fn(&str)) -> Self {
        self.verbose_handler = Some(handler);
        self
    }

    pub(crate) fn warn(&self, msg: &str) {
        if let Some(handler) = self.warn_handler {
            handler(msg);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("{}", msg);
        }
    }

    pub(crate) fn verbose(&self, msg: &str) {
        if let Some(handler) = self.verbose_handler {
            handler(msg);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!("{}", msg);
        }
    }
}

/// Options for transferring staged directories into volumes.
///
/// # Default Values
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `image` | `"hello-world"` | Image of the ephemeral container |
/// | `runtime` | `"docker"` | Container runtime CLI |
/// | `mount_root` | `"/mnt"` | Where volumes are mounted in the container |
/// | `create_flags` | empty | Extra `container create` flags |
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferOptions {
    /// Image used for the ephemeral container
    ///
    /// The container is created but never started, so any pullable image
    /// works. `busybox` is a good choice if core utilities are needed.
    pub image: String,

    /// Container runtime executable (`docker`, `podman`, ...)
    pub runtime: String,

    /// Directory inside the container under which volumes are mounted
    pub mount_root: String,

    /// Extra flags for `container create`, placed before the image
    pub create_flags: Vec<String>,

    /// Options for the staging step
    pub staging: StagingOptions,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            image: "hello-world".to_string(),
            runtime: "docker".to_string(),
            mount_root: "/mnt".to_string(),
            create_flags: Vec::new(),
            staging: StagingOptions::default(),
        }
    }
}

impl TransferOptions {
    /// Create options for the given image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Use a different container runtime executable
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Mount volumes under a different directory in the container
    #[must_use]
    pub fn with_mount_root(mut self, root: impl Into<String>) -> Self {
        self.mount_root = root.into();
        self
    }

    /// Append an extra `container create` flag
    #[must_use]
    pub fn with_create_flag(mut self, flag: impl Into<String>) -> Self {
        self.create_flags.push(flag.into());
        self
    }

    /// Replace the staging options
    #[must_use]
    pub fn with_staging(mut self, staging: StagingOptions) -> Self {
        self.staging = staging;
        self
    }

    /// Mount point of `volume` inside the container
    pub(crate) fn mount_point(&self, volume: &str) -> String {
        format!("{}/{}", self.mount_root.trim_end_matches('/'), volume)
    }
}
