//! Per-attempt workspace snapshots.
//!
//! Before each repair attempt the working tree is captured into a backup
//! directory so a regressing attempt can be reverted exactly. Version
//! control metadata, third-party packages, framework build output, and the
//! tool's own artifacts are excluded in both directions: they are not
//! captured, and a restore leaves them untouched in the tree.
//!
//! `rsync -a --delete` does the mirroring when available; otherwise a
//! walkdir-based recursive copy takes over, including deletion of files
//! created after the capture.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Top-level entries never captured or overwritten by a restore.
pub const SNAPSHOT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    ".next",
    "out",
    "coverage",
    ".lighthouseci",
    ".quick-gate",
];

// ============================================================================
// Snapshot manager
// ============================================================================

/// Captures and restores content copies of one working tree.
pub struct SnapshotManager {
    cwd: PathBuf,
    use_rsync: bool,
}

impl SnapshotManager {
    /// Create a manager for the tree at `cwd`, probing for the mirroring
    /// tool once.
    #[must_use]
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        let use_rsync = which::which("rsync").is_ok();
        debug!(use_rsync, "snapshot manager ready");
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            use_rsync,
        }
    }

    /// Force the recursive-copy fallback (used by tests).
    #[must_use]
    pub fn without_rsync(mut self) -> Self {
        self.use_rsync = false;
        self
    }

    /// Capture the tree into `backup_dir`.
    ///
    /// # Errors
    ///
    /// Fails when the backup directory cannot be written.
    pub fn capture(&self, backup_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(backup_dir)
            .with_context(|| format!("create backup dir {}", backup_dir.display()))?;

        if self.use_rsync {
            match self.mirror(&self.cwd, backup_dir) {
                Ok(()) => {
                    info!(backup = %backup_dir.display(), "workspace captured via rsync");
                    return Ok(());
                }
                Err(e) => {
                    warn!("rsync capture failed ({e}), falling back to recursive copy");
                }
            }
        }

        copy_tree(&self.cwd, backup_dir)?;
        info!(backup = %backup_dir.display(), "workspace captured via recursive copy");
        Ok(())
    }

    /// Overwrite the tree from `backup_dir`, deleting files created since
    /// the capture. Excluded entries in the tree are preserved.
    ///
    /// # Errors
    ///
    /// Fails when the backup is missing or the tree cannot be written.
    pub fn restore(&self, backup_dir: &Path) -> Result<()> {
        if !backup_dir.is_dir() {
            anyhow::bail!("backup directory missing: {}", backup_dir.display());
        }

        if self.use_rsync {
            match self.mirror(backup_dir, &self.cwd) {
                Ok(()) => {
                    info!(backup = %backup_dir.display(), "workspace restored via rsync");
                    return Ok(());
                }
                Err(e) => {
                    warn!("rsync restore failed ({e}), falling back to recursive copy");
                }
            }
        }

        restore_tree(backup_dir, &self.cwd)?;
        info!(backup = %backup_dir.display(), "workspace restored via recursive copy");
        Ok(())
    }

    /// One rsync mirror pass from `src` to `dest`.
    fn mirror(&self, src: &Path, dest: &Path) -> Result<()> {
        let mut command = Command::new("rsync");
        command.arg("-a").arg("--delete");
        for exclude in SNAPSHOT_EXCLUDES {
            command.arg(format!("--exclude={exclude}"));
        }
        // Trailing slashes: mirror contents, not the directory itself.
        command.arg(format!("{}/", src.display()));
        command.arg(format!("{}/", dest.display()));

        let output = command.output().context("spawn rsync")?;
        if !output.status.success() {
            anyhow::bail!(
                "rsync exited {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

// ============================================================================
// Recursive-copy fallback
// ============================================================================

/// Whether a top-level path component is excluded from snapshots.
fn is_excluded(relative: &Path) -> bool {
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| SNAPSHOT_EXCLUDES.contains(&first))
}

/// Relative file paths under `root`, exclusions pruned.
fn relative_files(root: &Path) -> Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| rel.as_os_str().is_empty() || !is_excluded(rel))
                .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.insert(rel.to_path_buf());
        }
    }
    Ok(files)
}

/// Copy every non-excluded file from `src` into `dest`.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for rel in relative_files(src)? {
        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src.join(&rel), &target)
            .with_context(|| format!("copy {}", rel.display()))?;
    }
    Ok(())
}

/// Mirror `backup` over `tree`: copy everything, then delete tree files
/// absent from the backup.
fn restore_tree(backup: &Path, tree: &Path) -> Result<()> {
    let backup_files = relative_files(backup)?;
    let tree_files = relative_files(tree)?;

    for stale in tree_files.difference(&backup_files) {
        let path = tree.join(stale);
        debug!(path = %path.display(), "removing file created after capture");
        std::fs::remove_file(&path)
            .with_context(|| format!("remove {}", path.display()))?;
    }

    copy_tree(backup, tree)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        std::fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn test_capture_and_restore_roundtrip() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        let backup = temp.path().join("backup");
        write(&tree, "src/a.ts", "original");
        write(&tree, "package.json", "{}");

        let manager = SnapshotManager::new(&tree).without_rsync();
        manager.capture(&backup).unwrap();

        // Mutate, create, then restore.
        write(&tree, "src/a.ts", "mutated");
        write(&tree, "src/new.ts", "created after capture");
        manager.restore(&backup).unwrap();

        assert_eq!(read(&tree, "src/a.ts"), "original");
        assert!(!tree.join("src/new.ts").exists());
        assert_eq!(read(&tree, "package.json"), "{}");
    }

    #[test]
    fn test_exclusions_not_captured() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        let backup = temp.path().join("backup");
        write(&tree, "src/a.ts", "keep");
        write(&tree, "node_modules/lib/index.js", "vendor");
        write(&tree, ".quick-gate/failures.json", "{}");

        let manager = SnapshotManager::new(&tree).without_rsync();
        manager.capture(&backup).unwrap();

        assert!(backup.join("src/a.ts").exists());
        assert!(!backup.join("node_modules").exists());
        assert!(!backup.join(".quick-gate").exists());
    }

    #[test]
    fn test_restore_preserves_excluded_dirs_in_tree() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        let backup = temp.path().join("backup");
        write(&tree, "src/a.ts", "v1");

        let manager = SnapshotManager::new(&tree).without_rsync();
        manager.capture(&backup).unwrap();

        // Artifacts written after the capture survive a restore.
        write(&tree, ".quick-gate/failures.json", "{\"status\":\"fail\"}");
        write(&tree, "node_modules/x/y.js", "vendor");
        write(&tree, "src/a.ts", "v2");
        manager.restore(&backup).unwrap();

        assert_eq!(read(&tree, "src/a.ts"), "v1");
        assert_eq!(read(&tree, ".quick-gate/failures.json"), "{\"status\":\"fail\"}");
        assert_eq!(read(&tree, "node_modules/x/y.js"), "vendor");
    }

    #[test]
    fn test_restore_missing_backup_is_error() {
        let temp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp.path()).without_rsync();
        assert!(manager.restore(&temp.path().join("nope")).is_err());
    }

    #[test]
    fn test_is_excluded_top_level_only() {
        assert!(is_excluded(Path::new("node_modules/lib/a.js")));
        assert!(is_excluded(Path::new(".git/config")));
        // Nested names do not match the top-level rule.
        assert!(!is_excluded(Path::new("src/build/output.ts")));
    }

    #[test]
    fn test_rsync_roundtrip_when_available() {
        if which::which("rsync").is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        let backup = temp.path().join("backup");
        write(&tree, "src/a.ts", "original");
        write(&tree, "node_modules/v/x.js", "vendor");

        let manager = SnapshotManager::new(&tree);
        manager.capture(&backup).unwrap();
        write(&tree, "src/a.ts", "mutated");
        write(&tree, "src/extra.ts", "new");
        manager.restore(&backup).unwrap();

        assert_eq!(read(&tree, "src/a.ts"), "original");
        assert!(!tree.join("src/extra.ts").exists());
        assert_eq!(read(&tree, "node_modules/v/x.js"), "vendor");
    }
}
