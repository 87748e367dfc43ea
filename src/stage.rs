//! Per-volume staging directories.
//!
//! For every named volume the stager decides between mounting an existing
//! host directory as-is (zero-copy) and building a fresh temporary
//! directory holding a copy of the volume's trees with metadata applied.

use crate::copy::{CopyStats, copy_tree};
use crate::error::{Error, Result, chain_cleanup};
use crate::metadata::{Overrides, set_metadata};
use crate::node::CopyNode;
use crate::options::StagingOptions;
use crate::shred::shred_dir;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Mapping from volume name to the root trees copied into it.
pub type VolumeMap = BTreeMap<String, BTreeSet<CopyNode>>;

/// The directory whose contents become one volume's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolDir {
    /// Target volume name
    pub name: String,
    /// Host directory to transfer
    pub path: PathBuf,
    /// Whether `path` is a staging directory that must be shredded after use
    pub is_temp: bool,
}

/// What staging would do for one volume, without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VolumePlan {
    /// Target volume name
    pub name: String,
    /// Number of root trees copied into the volume
    pub roots: usize,
    /// Host directory mounted in place, or `None` if a staging copy is needed
    pub mount: Option<PathBuf>,
}

/// Accept names made of ASCII alphanumerics and `_.-`, starting with an
/// alphanumeric, as container runtimes do for named volumes.
pub(crate) fn validate_volume_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)) {
        Ok(())
    } else {
        Err(Error::InvalidVolumeName(name.to_string()))
    }
}

/// The directory all roots share as parent, if it can be mounted as-is.
///
/// Returns `None` when the roots have distinct parents or any of them is
/// artificial.
fn shared_parent(roots: &BTreeSet<CopyNode>) -> Option<&Path> {
    let parents: BTreeSet<&Path> = roots.iter().map(CopyNode::parent_dir).collect();
    if parents.len() != 1 || roots.iter().any(CopyNode::artificial) {
        return None;
    }
    parents.into_iter().next()
}

/// Describe how every non-empty volume of `volumes` would be staged.
pub fn plan(volumes: &VolumeMap) -> Vec<VolumePlan> {
    volumes
        .iter()
        .filter(|(_, roots)| !roots.is_empty())
        .map(|(name, roots)| VolumePlan {
            name: name.clone(),
            roots: roots.len(),
            mount: shared_parent(roots).map(Path::to_path_buf),
        })
        .collect()
}

/// Owner of the [`VolDir`]s staged during one call.
///
/// Temporary directories are shredded by [`Staging::erase`]. A guard
/// dropped without `erase` (during a panic, for instance) shreds them on a
/// best-effort basis and reports failures through the warn handler.
#[derive(Debug)]
pub struct Staging {
    dirs: Vec<VolDir>,
    options: StagingOptions,
    stats: CopyStats,
}

impl Staging {
    /// Create an empty guard using `options` for staging and erasure.
    pub fn new(options: StagingOptions) -> Self {
        Self {
            dirs: Vec::new(),
            options,
            stats: CopyStats::default(),
        }
    }

    /// The directories staged so far.
    pub fn dirs(&self) -> &[VolDir] {
        &self.dirs
    }

    /// Copy statistics accumulated over every staged tree.
    pub fn stats(&self) -> &CopyStats {
        &self.stats
    }

    /// Stage every volume of `volumes`, in map order.
    ///
    /// A failing volume has its own temporary directory shredded before the
    /// error is returned. Directories of volumes staged before it stay in
    /// the guard, for [`erase`](Staging::erase) to remove.
    ///
    /// Every volume name is checked before anything is staged.
    pub fn stage(&mut self, volumes: &VolumeMap) -> Result<()> {
        volumes.keys().try_for_each(|name| validate_volume_name(name))?;
        for (name, roots) in volumes {
            if let Some(dir) = self.stage_volume(name, roots)? {
                self.dirs.push(dir);
            }
        }
        Ok(())
    }

    fn stage_volume(&mut self, name: &str, roots: &BTreeSet<CopyNode>) -> Result<Option<VolDir>> {
        if roots.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = shared_parent(roots) {
            self.options.verbose(&format!(
                "volume {} uses {} in place",
                name,
                parent.display()
            ));
            return Ok(Some(VolDir {
                name: name.to_string(),
                path: parent.to_path_buf(),
                is_temp: false,
            }));
        }

        let holding_dir = self.make_temp_dir().map_err(|e| Error::Staging {
            volume: name.to_string(),
            source: Box::new(e),
        })?;
        self.options.verbose(&format!(
            "staging volume {} in {}",
            name,
            holding_dir.display()
        ));

        match roots
            .iter()
            .try_for_each(|root| self.stage_root(root, &holding_dir))
        {
            Ok(()) => Ok(Some(VolDir {
                name: name.to_string(),
                path: holding_dir,
                is_temp: true,
            })),
            Err(e) => {
                let failed = Err(Error::Staging {
                    volume: name.to_string(),
                    source: Box::new(e),
                });
                let erased = shred_dir(&holding_dir, &self.options.shred_flags, &self.options);
                chain_cleanup(&holding_dir, failed, erased).map(|()| None)
            }
        }
    }

    fn make_temp_dir(&self) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.options.temp_prefix);
        let dir = match &self.options.temp_root {
            Some(root) => builder.tempdir_in(root).map_err(|e| Error::TempFile {
                path: root.clone(),
                source: e,
            })?,
            None => builder.tempdir().map_err(|e| Error::TempFile {
                path: std::env::temp_dir(),
                source: e,
            })?,
        };
        Ok(dir.keep())
    }

    fn stage_root(&mut self, root: &CopyNode, holding_dir: &Path) -> Result<()> {
        let output_dir = match root.subdir() {
            Some(subdir) => {
                let dir = holding_dir.join(subdir);
                fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
                dir
            }
            None => holding_dir.to_path_buf(),
        };

        let stats = copy_tree(root.path(), &output_dir.join(root.basename()), &self.options)?;
        self.stats.merge(&stats);
        set_metadata(root, &output_dir, None, &Overrides::default(), &self.options)
    }

    /// Shred every temporary directory in the guard.
    ///
    /// All directories are attempted; the first failure is returned, chained
    /// to any later ones.
    pub fn erase(self) -> Result<()> {
        self.erase_after(Ok(()))
    }

    /// Shred every temporary directory after an operation finished with
    /// `outcome`, chaining any erase failure onto it.
    pub(crate) fn erase_after(mut self, outcome: Result<()>) -> Result<()> {
        self.erase_all(outcome)
    }

    /// Give up ownership of the staged directories without erasing them.
    pub fn into_dirs(mut self) -> Vec<VolDir> {
        std::mem::take(&mut self.dirs)
    }

    fn erase_all(&mut self, mut outcome: Result<()>) -> Result<()> {
        for dir in std::mem::take(&mut self.dirs) {
            if dir.is_temp {
                let erased = shred_dir(&dir.path, &self.options.shred_flags, &self.options);
                outcome = chain_cleanup(&dir.path, outcome, erased);
            }
        }
        outcome
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = self.erase_all(Ok(())) {
            self.options
                .warn(&format!("Failed to erase staging directories: {e}"));
        }
    }
}

/// Stage every volume of `volumes` and return their directories.
///
/// On failure every temporary directory created by this call is shredded
/// before the error is returned. On success the caller owns the returned
/// directories and must shred the temporary ones with
/// [`shred_dir`](crate::shred_dir).
pub fn get_dirs(volumes: &VolumeMap, options: &StagingOptions) -> Result<Vec<VolDir>> {
    let mut staging = Staging::new(options.clone());
    match staging.stage(volumes) {
        Ok(()) => Ok(staging.into_dirs()),
        Err(e) => staging.erase_after(Err(e)).map(|()| Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{PermissionsExt, symlink};
    use tempfile::{TempDir, tempdir};

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn volumes(entries: Vec<(&str, Vec<CopyNode>)>) -> VolumeMap {
        entries
            .into_iter()
            .map(|(name, nodes)| (name.to_string(), nodes.into_iter().collect()))
            .collect()
    }

    /// host/
    ///   x/ (x.txt)
    ///   y/ (y.txt)
    ///   other/z/ (z.txt)
    fn host() -> TempDir {
        let dir = tempdir().unwrap();
        for sub in ["x", "y", "other/z"] {
            let path = dir.path().join(sub);
            fs::create_dir_all(&path).unwrap();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            fs::write(path.join(format!("{name}.txt")), &name).unwrap();
        }
        dir
    }

    fn options_in(root: &Path) -> StagingOptions {
        StagingOptions::default().with_temp_root(root)
    }

    #[test]
    fn test_shared_parent_is_zero_copy() {
        let host = host();
        let tmp = tempdir().unwrap();
        let map = volumes(vec![(
            "data",
            vec![
                CopyNode::new(host.path().join("x")).unwrap(),
                CopyNode::new(host.path().join("y")).unwrap(),
            ],
        )]);

        let dirs = get_dirs(&map, &options_in(tmp.path())).unwrap();

        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "data");
        assert!(!dirs[0].is_temp);
        assert_eq!(dirs[0].path, std::path::absolute(host.path()).unwrap());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_plan_matches_staging_decision() {
        let host = host();
        let restricted = CopyNode::builder(host.path().join("y"))
            .default_dir_perms("700")
            .build()
            .unwrap();
        let map = volumes(vec![
            ("empty", vec![]),
            ("plain", vec![CopyNode::new(host.path().join("x")).unwrap()]),
            ("restricted", vec![restricted]),
        ]);

        let plan = plan(&map);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "plain");
        assert_eq!(plan[0].mount.as_deref(), Some(host.path()));
        assert_eq!(plan[1].name, "restricted");
        assert_eq!(plan[1].mount, None);
        assert_eq!(plan[1].roots, 1);
    }

    #[test]
    fn test_empty_volume_yields_nothing() {
        let map = volumes(vec![("empty", vec![])]);
        let dirs = get_dirs(&map, &StagingOptions::default()).unwrap();
        assert!(dirs.is_empty());
    }

    #[test]
    fn test_distinct_parents_are_staged() {
        let host = host();
        let tmp = tempdir().unwrap();
        let map = volumes(vec![(
            "data",
            vec![
                CopyNode::new(host.path().join("x")).unwrap(),
                CopyNode::new(host.path().join("other/z")).unwrap(),
            ],
        )]);

        let options = options_in(tmp.path());
        let dirs = get_dirs(&map, &options).unwrap();

        assert_eq!(dirs.len(), 1);
        let dir = &dirs[0];
        assert!(dir.is_temp);
        assert!(dir.path.starts_with(tmp.path()));
        assert_eq!(fs::read_to_string(dir.path.join("x/x.txt")).unwrap(), "x");
        assert_eq!(fs::read_to_string(dir.path.join("z/z.txt")).unwrap(), "z");

        shred_dir(&dir.path, &[], &options).unwrap();
        assert!(!dir.path.exists());
    }

    #[test]
    fn test_artificial_root_staged_with_metadata() {
        let host = host();
        let tmp = tempdir().unwrap();
        let node = CopyNode::builder(host.path().join("y"))
            .default_file_perms("600")
            .subdir("nested/dir")
            .build()
            .unwrap();
        let map = volumes(vec![("b", vec![node])]);

        let options = options_in(tmp.path());
        let mut staging = Staging::new(options);
        staging.stage(&map).unwrap();

        let dir = staging.dirs()[0].clone();
        assert!(dir.is_temp);
        let staged = dir.path.join("nested/dir/y/y.txt");
        assert_eq!(mode_of(&staged), 0o600);
        assert_ne!(mode_of(&host.path().join("y/y.txt")), 0o600);
        assert_eq!(staging.stats().files_copied, 1);

        staging.erase().unwrap();
        assert!(!dir.path.exists());
    }

    #[test]
    fn test_failed_volume_is_shredded() {
        let host = host();
        let tmp = tempdir().unwrap();
        let good = CopyNode::builder(host.path().join("x"))
            .default_file_perms("644")
            .build()
            .unwrap();
        let bad = CopyNode::builder(host.path().join("y"))
            .default_file_perms("not-a-mode")
            .build()
            .unwrap();
        let map = volumes(vec![("a", vec![good]), ("b", vec![bad])]);

        let mut staging = Staging::new(options_in(tmp.path()));
        let err = staging.stage(&map).unwrap_err();
        assert!(matches!(&err, Error::Staging { volume, .. } if volume == "b"));

        // Volume "a" is still owned by the guard; "b" was erased already
        assert_eq!(staging.dirs().len(), 1);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);

        staging.erase().unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_get_dirs_erases_everything_on_failure() {
        let host = host();
        let tmp = tempdir().unwrap();
        let good = CopyNode::builder(host.path().join("x"))
            .default_file_perms("644")
            .build()
            .unwrap();
        let bad = CopyNode::builder(host.path().join("y"))
            .default_dir_perms("not-a-mode")
            .build()
            .unwrap();
        let map = volumes(vec![("a", vec![good]), ("b", vec![bad])]);

        assert!(get_dirs(&map, &options_in(tmp.path())).is_err());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_volume_names_checked_first() {
        let host = host();
        let tmp = tempdir().unwrap();
        for name in ["a:b", "a/b", "", "-lead", "ok,not"] {
            let node = CopyNode::builder(host.path().join("x"))
                .default_file_perms("644")
                .build()
                .unwrap();
            let map = volumes(vec![("good", vec![node.clone()]), (name, vec![node])]);

            let err = get_dirs(&map, &options_in(tmp.path())).unwrap_err();
            assert!(matches!(&err, Error::InvalidVolumeName(n) if n == name));
            assert!(err.is_construction());
            assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
        }
        for name in ["data", "web.static", "v_1-2"] {
            validate_volume_name(name).unwrap();
        }
    }

    #[test]
    fn test_symlink_root_staged_without_touching_host() {
        let host = host();
        let tmp = tempdir().unwrap();
        let real = host.path().join("real");
        fs::create_dir_all(real.join("sub")).unwrap();
        fs::write(real.join("sub/s.txt"), "s").unwrap();
        let link = host.path().join("link");
        symlink(&real, &link).unwrap();

        let sub = CopyNode::builder(link.join("sub"))
            .subdir("moved")
            .build()
            .unwrap();
        let root = CopyNode::builder(&link)
            .default_dir_perms("700")
            .child(sub)
            .build()
            .unwrap();
        assert!(root.artificial());
        let map = volumes(vec![("v", vec![root])]);

        let mut staging = Staging::new(options_in(tmp.path()));
        staging.stage(&map).unwrap();
        let dir = staging.dirs()[0].clone();
        assert!(dir.is_temp);

        let copy = dir.path.join("link");
        assert!(!fs::symlink_metadata(&copy).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(copy.join("moved/sub/s.txt")).unwrap(), "s");
        assert_eq!(mode_of(&copy), 0o700);

        assert!(real.join("sub/s.txt").is_file());
        assert!(!real.join("moved").exists());
        assert_ne!(mode_of(&real), 0o700);

        staging.erase().unwrap();
    }

    #[test]
    fn test_child_through_link_leaves_host_alone() {
        let host = host();
        let root = host.path().join("r");
        let outside = host.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("f.txt"), "f").unwrap();
        fs::set_permissions(outside.join("f.txt"), fs::Permissions::from_mode(0o644)).unwrap();
        symlink("../outside", root.join("lnk")).unwrap();

        let child = CopyNode::builder(root.join("lnk/f.txt"))
            .default_file_perms("600")
            .build()
            .unwrap();
        let err = CopyNode::builder(&root).child(child).build().unwrap_err();
        assert!(matches!(err, Error::ChildThroughSymlink { .. }));
        assert_eq!(mode_of(&outside.join("f.txt")), 0o644);
    }

    #[test]
    fn test_restrictive_dir_modes_still_erased() {
        for mode in ["300", "555", "000"] {
            let host = host();
            let tmp = tempdir().unwrap();
            let inner = host.path().join("d/inner");
            fs::create_dir_all(&inner).unwrap();
            fs::write(inner.join("secret.txt"), "secret").unwrap();
            let node = CopyNode::builder(host.path().join("d"))
                .default_dir_perms(mode)
                .build()
                .unwrap();
            let map = volumes(vec![("v", vec![node])]);

            let mut staging = Staging::new(options_in(tmp.path()));
            staging.stage(&map).unwrap();
            staging.erase().unwrap();
            assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0, "mode {mode}");
        }
    }

    #[test]
    fn test_drop_erases_temp_dirs() {
        let host = host();
        let tmp = tempdir().unwrap();
        let node = CopyNode::builder(host.path().join("x"))
            .default_file_perms("644")
            .build()
            .unwrap();
        let map = volumes(vec![("a", vec![node])]);

        {
            let mut staging = Staging::new(options_in(tmp.path()));
            staging.stage(&map).unwrap();
            assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
        }
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
