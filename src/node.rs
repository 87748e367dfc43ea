//! The copy-tree entity model.
//!
//! A [`CopyNode`] names one existing host path destined for a volume, together
//! with the children whose metadata should differ from it and the overrides
//! that cascade down the tree. Nodes are validated once, by
//! [`CopyNodeBuilder::build`], and never change afterwards.
//!
//! # Example
//!
//! ```no_run
//! use volstage::CopyNode;
//!
//! let config = CopyNode::builder("/srv/app/config")
//!     .default_user_owner("www-data")
//!     .default_file_perms("640")
//!     .child(CopyNode::builder("/srv/app/config/secrets").default_file_perms("600").build()?)
//!     .build()?;
//! # Ok::<(), volstage::Error>(())
//! ```

use crate::error::{Error, Result};
use nix::unistd::{Group, User};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Component, Path, PathBuf};

/// A user or group owner, by numeric id or by name.
///
/// Names are resolved against the host identity database when the node is
/// built, not against the container's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Numeric uid or gid
    Id(u32),
    /// User or group name
    Name(String),
}

impl From<u32> for Owner {
    fn from(id: u32) -> Self {
        Owner::Id(id)
    }
}

impl From<&str> for Owner {
    fn from(name: &str) -> Self {
        Owner::Name(name.to_string())
    }
}

impl From<String> for Owner {
    fn from(name: String) -> Self {
        Owner::Name(name)
    }
}

/// An immutable node of a copy tree.
///
/// Equality, ordering and hashing consider `path`, `subdir` and `children`
/// only. Two nodes for the same path that differ only in their metadata
/// overrides are equal, and a set keeps just one of them.
#[derive(Debug, Clone)]
pub struct CopyNode {
    path: PathBuf,
    children: BTreeSet<CopyNode>,
    subdir: Option<PathBuf>,
    default_user_owner: Option<u32>,
    default_group_owner: Option<u32>,
    default_file_perms: Option<String>,
    default_dir_perms: Option<String>,
}

impl CopyNode {
    /// Create an override-free node without children.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceNotFound`] if `path` does not exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder(path).build()
    }

    /// Start building a node for `path`.
    pub fn builder(path: impl AsRef<Path>) -> CopyNodeBuilder {
        CopyNodeBuilder::new(path)
    }

    /// Every entry of the host directory `dir` as a sibling, override-free node.
    ///
    /// Entries are returned sorted by path.
    pub fn entries_of(dir: impl AsRef<Path>) -> Result<Vec<CopyNode>> {
        let dir = dir.as_ref();
        let mut paths = fs::read_dir(dir)
            .map_err(|e| Error::io(dir, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::io(dir, e))?;
        paths.sort();
        paths.into_iter().map(CopyNode::new).collect()
    }

    /// Reopen this node's fields in a builder, to derive a changed node.
    ///
    /// Owners are carried over as already resolved ids.
    pub fn to_builder(&self) -> CopyNodeBuilder {
        CopyNodeBuilder {
            path: self.path.clone(),
            children: self.children.iter().cloned().collect(),
            subdir: self.subdir.clone(),
            default_user_owner: self.default_user_owner.map(Owner::Id),
            default_group_owner: self.default_group_owner.map(Owner::Id),
            default_file_perms: self.default_file_perms.clone(),
            default_dir_perms: self.default_dir_perms.clone(),
            children_from_dir: false,
        }
    }

    /// Absolute host path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Child nodes
    pub fn children(&self) -> &BTreeSet<CopyNode> {
        &self.children
    }

    /// Relative relocation target
    pub fn subdir(&self) -> Option<&Path> {
        self.subdir.as_deref()
    }

    /// User owner override, as a uid
    pub fn default_user_owner(&self) -> Option<u32> {
        self.default_user_owner
    }

    /// Group owner override, as a gid
    pub fn default_group_owner(&self) -> Option<u32> {
        self.default_group_owner
    }

    /// File permission override (a `chmod` mode)
    pub fn default_file_perms(&self) -> Option<&str> {
        self.default_file_perms.as_deref()
    }

    /// Directory permission override (a `chmod` mode)
    pub fn default_dir_perms(&self) -> Option<&str> {
        self.default_dir_perms.as_deref()
    }

    /// Last path component of the node's path
    pub(crate) fn basename(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    /// Directory holding the node's path
    pub(crate) fn parent_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Whether the node's path is a directory, following a final symlink
    pub(crate) fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    fn key(&self) -> (&Path, Option<&Path>, &BTreeSet<CopyNode>) {
        (&self.path, self.subdir.as_deref(), &self.children)
    }
}

impl PartialEq for CopyNode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CopyNode {}

impl PartialOrd for CopyNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CopyNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for CopyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Validating builder for [`CopyNode`].
///
/// All checks (path existence, file-with-children, absolute `subdir`, chmod
/// modes, owner names) run in [`build`](CopyNodeBuilder::build).
#[derive(Debug, Clone)]
#[must_use]
pub struct CopyNodeBuilder {
    path: PathBuf,
    children: Vec<CopyNode>,
    subdir: Option<PathBuf>,
    default_user_owner: Option<Owner>,
    default_group_owner: Option<Owner>,
    default_file_perms: Option<String>,
    default_dir_perms: Option<String>,
    children_from_dir: bool,
}

impl CopyNodeBuilder {
    /// Create a builder for `path` with no children and no overrides.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            children: Vec::new(),
            subdir: None,
            default_user_owner: None,
            default_group_owner: None,
            default_file_perms: None,
            default_dir_perms: None,
            children_from_dir: false,
        }
    }

    /// Add a child node.
    pub fn child(mut self, child: CopyNode) -> Self {
        self.children.push(child);
        self
    }

    /// Add several child nodes.
    pub fn children(mut self, children: impl IntoIterator<Item = CopyNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// Replace the children with every entry of the node's directory.
    ///
    /// Entries already given as explicit children are kept as given.
    pub fn children_from_dir(mut self) -> Self {
        self.children_from_dir = true;
        self
    }

    /// Relocate the node to `subdir` (relative) when staged.
    pub fn subdir(mut self, subdir: impl AsRef<Path>) -> Self {
        self.subdir = Some(subdir.as_ref().to_path_buf());
        self
    }

    /// Clear any relocation target.
    pub fn no_subdir(mut self) -> Self {
        self.subdir = None;
        self
    }

    /// Set the user owner for this node and default for its descendants.
    pub fn default_user_owner(mut self, owner: impl Into<Owner>) -> Self {
        self.default_user_owner = Some(owner.into());
        self
    }

    /// Set the group owner for this node and default for its descendants.
    pub fn default_group_owner(mut self, owner: impl Into<Owner>) -> Self {
        self.default_group_owner = Some(owner.into());
        self
    }

    /// Set the `chmod` mode for files at or below this node.
    pub fn default_file_perms(mut self, mode: impl Into<String>) -> Self {
        self.default_file_perms = Some(mode.into());
        self
    }

    /// Set the `chmod` mode for directories at or below this node.
    pub fn default_dir_perms(mut self, mode: impl Into<String>) -> Self {
        self.default_dir_perms = Some(mode.into());
        self
    }

    /// Validate and build the node.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceNotFound`] if the path does not exist
    /// - [`Error::FileWithChildren`] if the path is a plain file with children
    /// - [`Error::ChildOutsideParent`] if a child path is not inside the path
    /// - [`Error::ChildThroughSymlink`] if a child is reached through a
    ///   symlinked directory below the path
    /// - [`Error::AbsoluteSubdir`] if `subdir` is absolute or contains `..`
    /// - [`Error::InvalidPermissions`] for an empty or `"--"` mode
    /// - [`Error::UnknownUser`] / [`Error::UnknownGroup`] for unknown names
    pub fn build(self) -> Result<CopyNode> {
        let path = std::path::absolute(&self.path).map_err(|e| Error::io(&self.path, e))?;

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::SourceNotFound(path));
            }
            Err(e) => return Err(Error::io(&path, e)),
        };

        // A symlink root counts as the directory it points at
        let is_dir = meta.is_dir() || path.is_dir();

        let mut children: BTreeSet<CopyNode> = BTreeSet::new();
        if self.children_from_dir && is_dir {
            let explicit: BTreeSet<&Path> = self.children.iter().map(CopyNode::path).collect();
            for entry in CopyNode::entries_of(&path)? {
                if !explicit.contains(entry.path()) {
                    children.insert(entry);
                }
            }
        }
        children.extend(self.children);

        if !is_dir && !children.is_empty() {
            return Err(Error::FileWithChildren(path));
        }

        for child in &children {
            let inside = child
                .path
                .strip_prefix(&path)
                .is_ok_and(|rel| !rel.as_os_str().is_empty() && is_plain_relative(rel));
            if !inside {
                return Err(Error::ChildOutsideParent {
                    parent: path,
                    child: child.path.clone(),
                });
            }
            check_no_link_below(&path, child)?;
        }

        if let Some(subdir) = &self.subdir {
            let escapes = subdir.components().any(|c| c == Component::ParentDir);
            if subdir.is_absolute() || escapes {
                return Err(Error::AbsoluteSubdir(subdir.clone()));
            }
        }

        for mode in [&self.default_file_perms, &self.default_dir_perms]
            .into_iter()
            .flatten()
        {
            validate_mode(mode)?;
        }

        let default_user_owner = self.default_user_owner.map(resolve_user).transpose()?;
        let default_group_owner = self.default_group_owner.map(resolve_group).transpose()?;

        Ok(CopyNode {
            path,
            children,
            subdir: self.subdir,
            default_user_owner,
            default_group_owner,
            default_file_perms: self.default_file_perms,
            default_dir_perms: self.default_dir_perms,
        })
    }
}

fn is_plain_relative(rel: &Path) -> bool {
    rel.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Fail if `child` is reached from `parent` through a symlinked directory.
///
/// The copy of a tree recreates its symlinks, so a child behind one would
/// have its overrides applied through the link to the host.
fn check_no_link_below(parent: &Path, child: &CopyNode) -> Result<()> {
    let is_link = |p: &Path| fs::symlink_metadata(p).is_ok_and(|m| m.file_type().is_symlink());

    if let Some(dir) = child.path.parent() {
        for ancestor in dir.ancestors().take_while(|a| *a != parent) {
            if is_link(ancestor) {
                return Err(Error::ChildThroughSymlink {
                    link: ancestor.to_path_buf(),
                    child: child.path.clone(),
                });
            }
        }
    }
    if let Some(grandchild) = child.children.first() {
        if is_link(&child.path) {
            return Err(Error::ChildThroughSymlink {
                link: child.path.clone(),
                child: grandchild.path.clone(),
            });
        }
    }
    Ok(())
}

/// Reject modes that `chmod` would misread as an option terminator or nothing at all.
fn validate_mode(mode: &str) -> Result<()> {
    if mode.is_empty() || mode == "--" {
        return Err(Error::InvalidPermissions(mode.to_string()));
    }
    Ok(())
}

fn resolve_user(owner: Owner) -> Result<u32> {
    match owner {
        Owner::Id(uid) => Ok(uid),
        Owner::Name(name) => match User::from_name(&name) {
            Ok(Some(user)) => Ok(user.uid.as_raw()),
            Ok(None) => Err(Error::UnknownUser(name)),
            Err(source) => Err(Error::IdentityLookup { name, source }),
        },
    }
}

fn resolve_group(owner: Owner) -> Result<u32> {
    match owner {
        Owner::Id(gid) => Ok(gid),
        Owner::Name(name) => match Group::from_name(&name) {
            Ok(Some(group)) => Ok(group.gid.as_raw()),
            Ok(None) => Err(Error::UnknownGroup(name)),
            Err(source) => Err(Error::IdentityLookup { name, source }),
        },
    }
}
