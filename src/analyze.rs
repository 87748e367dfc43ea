//! Deciding whether a copy tree must be staged.
//!
//! A tree is *artificial* when its representation inside a volume cannot be
//! the host path as-is: some owner differs from what is on disk, some
//! permission mode is requested, or some node is relocated.

use crate::node::CopyNode;
use std::fs;
use std::os::unix::fs::MetadataExt;

impl CopyNode {
    /// Whether this tree must be copied to a staging directory first.
    ///
    /// A `false` result means the node's path can be mounted or copied
    /// directly, since nothing on the way into the volume would differ from
    /// the host.
    ///
    /// Owner overrides only count when they differ from the current owner.
    /// Permission overrides always count: a mode like `u+x` cannot be
    /// compared against the current numeric mode without applying it.
    pub fn artificial(&self) -> bool {
        self.changes_user_owner()
            || self.changes_group_owner()
            || self.may_change_perms()
            || self.has_custom_subdir()
            || self.children().iter().any(CopyNode::artificial)
    }

    fn changes_user_owner(&self) -> bool {
        match self.default_user_owner() {
            Some(uid) => fs::symlink_metadata(self.path())
                .map(|m| m.uid() != uid)
                .unwrap_or(true),
            None => false,
        }
    }

    fn changes_group_owner(&self) -> bool {
        match self.default_group_owner() {
            Some(gid) => fs::symlink_metadata(self.path())
                .map(|m| m.gid() != gid)
                .unwrap_or(true),
            None => false,
        }
    }

    fn may_change_perms(&self) -> bool {
        self.default_file_perms().is_some()
            || (self.default_dir_perms().is_some() && self.is_dir())
    }

    fn has_custom_subdir(&self) -> bool {
        self.subdir().is_some() || self.children().iter().any(CopyNode::has_custom_subdir)
    }
}
