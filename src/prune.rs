use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub kept: usize,
    pub removed_files: usize,
    pub removed_dirs: usize,
    pub failures: usize,
}

/// Clears the read-only bit (git marks pack files read-only on Windows) and deletes.
fn remove_file(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_symlink() {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(path, perms)?;
        }
    }
    fs::remove_file(path)
}

fn matches_extension(name: &std::ffi::OsStr, extension: &str) -> bool {
    name.to_string_lossy().ends_with(extension)
}

/// Deletes everything under `root` whose name does not end in `extension`,
/// then removes the directories that became empty, deepest first.
///
/// Best effort: a file that cannot be deleted is logged and counted, the
/// sweep carries on. Directories that still hold files are left alone.
pub fn prune_tree(root: &Path, extension: &str) -> PruneStats {
    let mut stats = PruneStats::default();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to walk {}: {}", root.display(), e);
                stats.failures += 1;
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if matches_extension(entry.file_name(), extension) {
            stats.kept += 1;
            continue;
        }
        match remove_file(entry.path()) {
            Ok(()) => stats.removed_files += 1,
            Err(e) => {
                warn!("Failed to delete {}: {}", entry.path().display(), e);
                stats.failures += 1;
            }
        }
    }

    let dirs = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());
    for dir in dirs {
        // Non-empty directories fail here; that is expected.
        if fs::remove_dir(dir.path()).is_ok() {
            stats.removed_dirs += 1;
        }
    }

    debug!(
        "Pruned {}: kept {}, removed {} files and {} directories, {} failures",
        root.display(),
        stats.kept,
        stats.removed_files,
        stats.removed_dirs,
        stats.failures
    );
    stats
}

/// Recursively deletes `root`. Returns the number of entries that could not be
/// removed. A missing `root` is a no-op.
pub fn remove_tree(root: &Path) -> usize {
    if fs::symlink_metadata(root).is_err() {
        return 0;
    }

    let mut failures = 0;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to walk {}: {}", root.display(), e);
                failures += 1;
                continue;
            }
        };
        let result = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            remove_file(entry.path())
        };
        if let Err(e) = result {
            warn!("Failed to remove {}: {}", entry.path().display(), e);
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn listing(root: &Path) -> BTreeSet<PathBuf> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap().path().strip_prefix(root).unwrap().to_path_buf())
            .collect()
    }

    #[test]
    fn keeps_only_target_extension() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        for rel in ["a.ext", "b.txt", "sub/c.ext", "sub/d.log"] {
            touch(&root, rel);
        }

        let stats = prune_tree(&root, ".ext");

        let expected: BTreeSet<PathBuf> =
            ["a.ext", "sub", "sub/c.ext"].iter().map(PathBuf::from).collect();
        assert_eq!(listing(&root), expected);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.removed_files, 2);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn removes_directories_left_empty() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        for rel in [
            "src/main/java/App.java",
            ".git/objects/pack/pack-1.pack",
            ".git/HEAD",
            "docs/img/logo.png",
            "README.md",
        ] {
            touch(&root, rel);
        }

        let stats = prune_tree(&root, ".java");

        let expected: BTreeSet<PathBuf> = ["src", "src/main", "src/main/java", "src/main/java/App.java"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(listing(&root), expected);
        assert!(!root.join(".git").exists());
        assert_eq!(stats.removed_dirs, 5);
    }

    #[test]
    fn deletes_read_only_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        touch(&root, "locked.idx");
        let path = root.join("locked.idx");
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        prune_tree(&root, ".java");

        assert!(!path.exists());
    }

    #[test]
    fn prune_without_matches_removes_everything() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        touch(&root, "a/b/c.txt");

        prune_tree(&root, ".java");

        assert!(!root.exists());
    }

    #[test]
    fn remove_tree_deletes_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("partial");
        touch(&root, ".git/objects/ab/cdef");
        touch(&root, "src/Main.java");

        assert_eq!(remove_tree(&root), 0);
        assert!(!root.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn remove_tree_twice_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("never-created");

        assert_eq!(remove_tree(&root), 0);
        assert_eq!(remove_tree(&root), 0);
        assert!(!root.exists());
    }
}
