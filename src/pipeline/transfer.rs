use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{StageError, StageResult};
use crate::pipeline::util::to_posix;

/// How a bulk operation reacts to a failing item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepPolicy {
    pub stop_on_first_error: bool,
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PurgeOutcome {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<ItemFailure>,
}

fn walk_err(err: walkdir::Error) -> (PathBuf, io::Error) {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let io_err = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    (path, io_err)
}

fn ensure_parent(path: &Path) -> StageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| StageError::transition("create parent dir", parent, err))?;
    }
    Ok(())
}

/// Move one file, creating destination parents. Falls back to copy+remove
/// only when `rename` cannot cross devices.
pub fn move_file(from: &Path, to: &Path) -> StageResult<()> {
    if from == to {
        return Ok(());
    }
    ensure_parent(to)?;

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            copy_then_remove(from, to, |path| fs::remove_file(path))
        }
        Err(err) => Err(StageError::transition("move file", from, err)),
    }
}

/// A source that cannot be removed takes its copy with it, so the file never
/// ends up in both stages.
fn copy_then_remove(
    from: &Path,
    to: &Path,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> StageResult<()> {
    fs::copy(from, to).map_err(|err| StageError::transition("copy file", from, err))?;
    if let Err(err) = remove(from) {
        let _ = fs::remove_file(to);
        return Err(StageError::transition("remove source file", from, err));
    }
    Ok(())
}

/// Copy every entry under `from` into `to`, which may already exist.
pub fn copy_tree(from: &Path, to: &Path) -> StageResult<u64> {
    let mut copied = 0u64;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|err| {
            let (path, io_err) = walk_err(err);
            StageError::transition("walk source tree", path, io_err)
        })?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| StageError::InvalidName(entry.path().display().to_string()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| StageError::transition("create dir", &target, err))?;
        } else {
            ensure_parent(&target)?;
            fs::copy(entry.path(), &target)
                .map_err(|err| StageError::transition("copy file", entry.path(), err))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Relative path → SHA-256 for every file under `root`.
pub fn tree_manifest(root: &Path) -> StageResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| {
            let (path, io_err) = walk_err(err);
            StageError::transition("walk tree", path, io_err)
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let bytes = fs::read(entry.path())
            .map_err(|err| StageError::transition("read file", entry.path(), err))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        out.insert(to_posix(rel), format!("{:x}", hasher.finalize()));
    }
    Ok(out)
}

/// Copy `from` to `to` through a hidden staging directory next to `to`, then
/// publish it with one `rename`. A failed copy leaves `to` untouched; the
/// staging directory is removed when the guard drops.
pub fn copy_tree_staged(from: &Path, to: &Path, verify: bool) -> StageResult<u64> {
    let parent = to
        .parent()
        .ok_or_else(|| StageError::InvalidName(to.display().to_string()))?;
    fs::create_dir_all(parent).map_err(|err| StageError::transition("create dir", parent, err))?;
    let staging = tempfile::Builder::new()
        .prefix(".fieldstage-staging-")
        .tempdir_in(parent)
        .map_err(|err| StageError::transition("create staging dir", parent, err))?;

    let copied = copy_tree(from, staging.path())?;

    if verify {
        let source_manifest = tree_manifest(from)?;
        let staged_manifest = tree_manifest(staging.path())?;
        if source_manifest != staged_manifest {
            return Err(StageError::transition(
                "verify copy",
                to,
                io::Error::new(
                    ErrorKind::InvalidData,
                    "staged copy does not match source manifest",
                ),
            ));
        }
    }

    if to.exists() {
        return Err(StageError::Collision {
            path: to.to_path_buf(),
        });
    }
    fs::rename(staging.path(), to).map_err(|err| StageError::transition("publish copy", to, err))?;
    Ok(copied)
}

/// Move a directory tree. Within one volume this is a single `rename`;
/// across volumes it becomes a staged copy followed by source removal.
pub fn move_dir(from: &Path, to: &Path) -> StageResult<()> {
    ensure_parent(to)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            copy_tree_staged(from, to, true)?;
            fs::remove_dir_all(from)
                .map_err(|err| StageError::transition("remove source dir", from, err))
        }
        Err(err) => Err(StageError::transition("move dir", from, err)),
    }
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let lower = name.to_string_lossy().to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext.to_ascii_lowercase())))
}

/// Delete every file under `root` whose name ends in one of `extensions`
/// (case-insensitive). With the default policy individual failures are
/// collected and the walk continues.
pub fn purge_extensions(
    root: &Path,
    extensions: &[String],
    policy: SweepPolicy,
) -> StageResult<PurgeOutcome> {
    purge_extensions_with(root, extensions, policy, |path| fs::remove_file(path))
}

pub(crate) fn purge_extensions_with(
    root: &Path,
    extensions: &[String],
    policy: SweepPolicy,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> StageResult<PurgeOutcome> {
    let mut out = PurgeOutcome::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let (path, io_err) = walk_err(err);
                if policy.stop_on_first_error {
                    return Err(StageError::transition("walk tree", path, io_err));
                }
                out.failed.push(ItemFailure {
                    path,
                    error: io_err.to_string(),
                });
                continue;
            }
        };
        if entry.file_type().is_dir() || !has_extension(entry.path(), extensions) {
            continue;
        }
        match remove(entry.path()) {
            Ok(()) => out.deleted.push(entry.path().to_path_buf()),
            Err(err) => {
                if policy.stop_on_first_error {
                    return Err(StageError::transition("delete file", entry.path(), err));
                }
                out.failed.push(ItemFailure {
                    path: entry.path().to_path_buf(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed(root: &Path) {
        fs::create_dir_all(root.join("SiteA_S1_2024-01-01/sub")).expect("mkdir");
        fs::write(root.join("SiteA_S1_2024-01-01/a.jpg"), b"a").expect("write");
        fs::write(root.join("SiteA_S1_2024-01-01/sub/b.jpg"), b"bb").expect("write");
        fs::write(root.join("notes.txt"), b"n").expect("write");
    }

    #[test]
    fn staged_copy_publishes_identical_tree() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src/P1");
        seed(&src);
        let dst = tmp.path().join("dst/P1");

        let copied = copy_tree_staged(&src, &dst, true).expect("copy");
        assert_eq!(copied, 3);
        assert_eq!(
            tree_manifest(&src).expect("src"),
            tree_manifest(&dst).expect("dst")
        );

        let leftovers = fs::read_dir(tmp.path().join("dst"))
            .expect("read")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".fieldstage"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn staged_copy_refuses_existing_destination() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src/P1");
        seed(&src);
        let dst = tmp.path().join("dst/P1");
        fs::create_dir_all(&dst).expect("mkdir");
        fs::write(dst.join("keep.txt"), b"keep").expect("write");

        let err = copy_tree_staged(&src, &dst, false).expect_err("collision");
        assert!(matches!(err, StageError::Collision { .. }));
        assert_eq!(fs::read(dst.join("keep.txt")).expect("read"), b"keep");
    }

    #[test]
    fn move_file_creates_parents() {
        let tmp = tempdir().expect("tempdir");
        let from = tmp.path().join("a.jpg");
        fs::write(&from, b"x").expect("write");
        let to = tmp.path().join("deep/nested/a.jpg");

        move_file(&from, &to).expect("move");
        assert!(!from.exists());
        assert_eq!(fs::read(&to).expect("read"), b"x");
    }

    #[test]
    fn failed_source_removal_drops_the_copy() {
        let tmp = tempdir().expect("tempdir");
        let from = tmp.path().join("intake/a.jpg");
        let to = tmp.path().join("archive/a.jpg");
        fs::create_dir_all(from.parent().expect("parent")).expect("mkdir");
        fs::create_dir_all(to.parent().expect("parent")).expect("mkdir");
        fs::write(&from, b"x").expect("write");

        let err = copy_then_remove(&from, &to, |_| {
            Err(io::Error::new(ErrorKind::PermissionDenied, "locked"))
        })
        .expect_err("locked source");
        assert!(matches!(err, StageError::Transition { op: "remove source file", .. }));
        assert_eq!(fs::read(&from).expect("read"), b"x");
        assert!(!to.exists());
    }

    #[test]
    fn move_file_reports_rename_failure_without_copying() {
        let tmp = tempdir().expect("tempdir");
        let from = tmp.path().join("a.jpg");
        fs::write(&from, b"x").expect("write");
        let to = tmp.path().join("b");
        fs::create_dir_all(to.join("occupied")).expect("mkdir");

        // Renaming a file over a non-empty directory fails, and no copy is tried.
        let err = move_file(&from, &to).expect_err("occupied");
        assert!(matches!(err, StageError::Transition { op: "move file", .. }));
        assert!(from.is_file());
        assert!(to.join("occupied").is_dir());
    }

    #[test]
    fn move_dir_relocates_whole_tree() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("intake/P1");
        seed(&src);
        let before = tree_manifest(&src).expect("manifest");
        let dst = tmp.path().join("archive/P1");

        move_dir(&src, &dst).expect("move");
        assert!(!src.exists());
        assert_eq!(tree_manifest(&dst).expect("manifest"), before);
    }

    #[test]
    fn purge_matches_extension_case_insensitively() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("P1");
        seed(&root);
        fs::write(root.join("SiteA_S1_2024-01-01/clip.MP4"), b"v").expect("write");
        fs::write(root.join("SiteA_S1_2024-01-01/sub/walk.mp4"), b"v").expect("write");
        fs::write(root.join("SiteA_S1_2024-01-01/mp4.jpg"), b"i").expect("write");

        let out = purge_extensions(&root, &["mp4".to_string()], SweepPolicy::default())
            .expect("purge");
        assert_eq!(out.deleted.len(), 2);
        assert!(out.failed.is_empty());
        assert!(root.join("SiteA_S1_2024-01-01/mp4.jpg").exists());
        assert!(!root.join("SiteA_S1_2024-01-01/clip.MP4").exists());
    }

    #[test]
    fn purge_collects_failed_deletions_and_keeps_going() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("P1");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("a.mp4"), b"v").expect("write");
        fs::write(root.join("b.mp4"), b"v").expect("write");
        let exts = vec!["mp4".to_string()];
        let busy = |path: &Path| {
            if path.ends_with("a.mp4") {
                Err(io::Error::new(ErrorKind::PermissionDenied, "busy"))
            } else {
                fs::remove_file(path)
            }
        };

        let out = purge_extensions_with(&root, &exts, SweepPolicy::default(), busy)
            .expect("purge");
        assert_eq!(out.deleted, vec![root.join("b.mp4")]);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].path, root.join("a.mp4"));
        assert!(out.failed[0].error.contains("busy"));
        assert!(root.join("a.mp4").exists());
    }

    #[test]
    fn purge_stops_on_first_failed_deletion_when_asked() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("P1");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("a.mp4"), b"v").expect("write");
        let policy = SweepPolicy {
            stop_on_first_error: true,
        };

        let err = purge_extensions_with(&root, &["mp4".to_string()], policy, |_| {
            Err(io::Error::new(ErrorKind::PermissionDenied, "busy"))
        })
        .expect_err("stop");
        assert!(matches!(err, StageError::Transition { op: "delete file", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn purge_matches_names_that_are_not_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("P1");
        fs::create_dir_all(&root).expect("mkdir");
        let clip = root.join(OsStr::from_bytes(b"clip\xff.MP4"));
        fs::write(&clip, b"v").expect("write");

        assert!(has_extension(&clip, &["mp4".to_string()]));
        let out = purge_extensions(&root, &["mp4".to_string()], SweepPolicy::default())
            .expect("purge");
        assert_eq!(out.deleted, vec![clip.clone()]);
        assert!(!clip.exists());
    }

    #[test]
    fn has_extension_requires_dot_suffix() {
        let exts = vec!["mp4".to_string()];
        assert!(has_extension(Path::new("a/B.Mp4"), &exts));
        assert!(!has_extension(Path::new("a/mp4"), &exts));
        assert!(!has_extension(Path::new("a/clip.mp4.jpg"), &exts));
    }
}
