//! Atomic tree replace with backup-per-overwrite.
//!
//! Four phases:
//! 1. create a fresh, uniquely named backup directory before touching
//!    anything;
//! 2. snapshot every protected path that exists in the target into the
//!    backup - after this point the snapshot is read-only input, so a crash
//!    at any later phase never loses a protected file;
//! 3. recursively mirror the source into the target, skipping protected
//!    paths and the fixed excludes, copying every target file about to be
//!    overwritten into the backup at its mirrored relative path;
//! 4. restore the protected paths from the snapshot verbatim, guarding
//!    against accidental inclusion during the mirror (directories are
//!    replaced whole, files copied over).
//!
//! Rollback is the same operation reversed: source = backup, target = live,
//! protected = [].

use chrono::Utc;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::MIRROR_EXCLUDES;
use crate::error::UpdateError;

/// Mirror `source_root` over `target_root`, preserving `protected` paths and
/// backing up every overwritten file. Returns the backup directory; on
/// failure the error carries the partially populated backup for rollback.
pub fn atomic_replace(
    source_root: &Path,
    target_root: &Path,
    protected: &[PathBuf],
    backups_root: &Path,
    version_tag: &str,
) -> Result<PathBuf, UpdateError> {
    if !source_root.exists() {
        return Err(UpdateError::Replace {
            reason: format!("source directory does not exist: {}", source_root.display()),
            backup: None,
        });
    }

    // Phase 1: fresh backup directory, before anything is touched.
    let backup_dir = backups_root.join(format!(
        "backup_{}_{}",
        version_tag,
        Utc::now().timestamp_millis()
    ));
    fs::create_dir_all(&backup_dir).map_err(|e| UpdateError::Replace {
        reason: format!("cannot create backup directory: {e}"),
        backup: None,
    })?;

    let fail = |reason: String| UpdateError::Replace {
        reason,
        backup: Some(backup_dir.clone()),
    };

    // Phase 2: protected snapshot. A protected path that contains the backup
    // directory itself (the default backups root does) must not be copied:
    // the walk would descend into the snapshot it is writing. The mirror
    // never touches it, so it needs no snapshot.
    for rel in protected {
        let live = target_root.join(rel);
        if backup_dir.starts_with(&live) {
            debug!(
                "skipping snapshot of {}, it holds this run's backup",
                rel.display()
            );
            continue;
        }
        if live.exists() {
            copy_path(&live, &backup_dir.join(rel))
                .map_err(|e| fail(format!("backup of {} failed: {e}", rel.display())))?;
            debug!("backed up protected path {}", rel.display());
        }
    }

    // Phase 3: mirror with backup-per-overwrite.
    let protected_set: HashSet<&Path> = protected.iter().map(PathBuf::as_path).collect();
    mirror(
        source_root,
        target_root,
        Path::new(""),
        &protected_set,
        &backup_dir,
    )
    .map_err(|e| fail(format!("mirror failed: {e}")))?;

    // Phase 4: restore protected paths from the snapshot. Never restore over
    // the directory holding this run's snapshot.
    for rel in protected {
        let saved = backup_dir.join(rel);
        if !saved.exists() {
            continue;
        }
        let live = target_root.join(rel);
        if backup_dir.starts_with(&live) {
            continue;
        }
        if saved.is_dir() {
            if live.exists() {
                fs::remove_dir_all(&live)
                    .map_err(|e| fail(format!("restore of {} failed: {e}", rel.display())))?;
            }
            copy_path(&saved, &live)
                .map_err(|e| fail(format!("restore of {} failed: {e}", rel.display())))?;
        } else {
            copy_path(&saved, &live)
                .map_err(|e| fail(format!("restore of {} failed: {e}", rel.display())))?;
        }
        info!("preserved protected path {}", rel.display());
    }

    Ok(backup_dir)
}

/// Recursive mirror. `rel` is the path of `src` relative to the source root;
/// protected paths and fixed excludes are matched against it.
fn mirror(
    src: &Path,
    dst: &Path,
    rel: &Path,
    protected: &HashSet<&Path>,
    backup_dir: &Path,
) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let child_rel = rel.join(&name);

        if protected.contains(child_rel.as_path()) {
            continue;
        }
        if MIRROR_EXCLUDES.iter().any(|e| name.as_os_str() == OsStr::new(e)) {
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&name);

        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dst_path)?;
            mirror(&src_path, &dst_path, &child_rel, protected, backup_dir)?;
        } else {
            // Snapshot the file we are about to overwrite; this is what
            // makes the operation reversible.
            if dst_path.exists() {
                copy_file(&dst_path, &backup_dir.join(&child_rel))?;
            }
            copy_file(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Copy a file or a whole directory tree.
fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(io::Error::from)?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                copy_file(entry.path(), &target)?;
            }
        }
        Ok(())
    } else {
        copy_file(src, dst)
    }
}

fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn test_mirror_overwrites_and_adds() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        write(&source, "index.js", "new main");
        write(&source, "lib/util.js", "new util");
        write(&target, "index.js", "old main");

        let backup = atomic_replace(&source, &target, &[], &backups, "1.3.0").unwrap();

        assert_eq!(read(&target, "index.js"), "new main");
        assert_eq!(read(&target, "lib/util.js"), "new util");
        // The overwritten file was snapshotted at its relative path.
        assert_eq!(read(&backup, "index.js"), "old main");
        // Files that were only added have no snapshot.
        assert!(!backup.join("lib/util.js").exists());
    }

    #[test]
    fn test_protected_paths_survive_byte_identical() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        write(&source, "config.json", "{\"shipped\": true}");
        write(&source, "storage/cache.bin", "shipped cache");
        write(&target, "config.json", "{\"local\": true}");
        write(&target, "storage/cache.bin", "local cache");
        write(&target, "storage/deep/notes.txt", "local notes");

        let protected = vec![PathBuf::from("config.json"), PathBuf::from("storage")];
        atomic_replace(&source, &target, &protected, &backups, "1.3.0").unwrap();

        assert_eq!(read(&target, "config.json"), "{\"local\": true}");
        assert_eq!(read(&target, "storage/cache.bin"), "local cache");
        assert_eq!(read(&target, "storage/deep/notes.txt"), "local notes");
    }

    #[test]
    fn test_backups_root_inside_target_with_backups_protected() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        // The default wiring: backups live under the install root and the
        // backups root itself is in the protected set.
        let backups = target.join("backups");

        write(&source, "index.js", "new main");
        write(&target, "index.js", "old main");
        write(&target, ".env", "TOKEN=secret");
        // A previous run's backup already lives under the backups root.
        write(&target, "backups/backup_1.1.0_100/index.js", "older main");

        let protected = vec![PathBuf::from(".env"), PathBuf::from("backups")];
        let backup = atomic_replace(&source, &target, &protected, &backups, "1.2.0").unwrap();
        assert!(backup.starts_with(&backups));

        assert_eq!(read(&target, "index.js"), "new main");
        assert_eq!(read(&target, ".env"), "TOKEN=secret");
        assert_eq!(read(&backup, "index.js"), "old main");
        // Prior backups are never mutated by a later run.
        assert_eq!(
            read(&target, "backups/backup_1.1.0_100/index.js"),
            "older main"
        );
        // The run's own snapshot holds no copy of the backups root.
        assert!(!backup.join("backups").exists());
    }

    #[test]
    fn test_fixed_excludes_are_skipped() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        write(&source, ".git/HEAD", "ref: refs/heads/main");
        write(&source, "node_modules/dep/index.js", "dep");
        write(&source, "index.js", "main");

        atomic_replace(&source, &target, &[], &backups, "1.3.0").unwrap();

        assert!(target.join("index.js").exists());
        assert!(!target.join(".git").exists());
        assert!(!target.join("node_modules").exists());
    }

    #[test]
    fn test_apply_then_reverse_restores_overwritten_files() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        for i in 0..10 {
            write(&target, &format!("file{i}.js"), &format!("old {i}"));
            write(&source, &format!("file{i}.js"), &format!("new {i}"));
        }

        let backup = atomic_replace(&source, &target, &[], &backups, "1.3.0").unwrap();
        for i in 0..10 {
            assert_eq!(read(&target, &format!("file{i}.js")), format!("new {i}"));
        }

        // Reverse: source = backup, target = live, protected = [].
        atomic_replace(&backup, &target, &[], &backups, "rollback").unwrap();
        for i in 0..10 {
            assert_eq!(read(&target, &format!("file{i}.js")), format!("old {i}"));
        }
    }

    #[test]
    fn test_mid_mirror_failure_reports_backup_and_rolls_back() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        for i in 0..10 {
            write(&target, &format!("file{i}.js"), &format!("old {i}"));
            write(&source, &format!("file{i}.js"), &format!("new {i}"));
        }
        // A directory in the target where the source ships a file makes the
        // mirror fail partway through.
        write(&source, "conflict", "I am a file");
        fs::create_dir_all(target.join("conflict/leftover")).unwrap();
        write(&target, "conflict/leftover/data.txt", "nested");

        let err =
            atomic_replace(&source, &target, &[], &backups, "1.3.0").unwrap_err();
        let backup = match &err {
            UpdateError::Replace { backup: Some(b), .. } => b.clone(),
            other => panic!("expected replace failure with backup, got {other:?}"),
        };

        // Reverse-apply the partial backup; every file that was overwritten
        // before the failure comes back.
        atomic_replace(&backup, &target, &[], &backups, "rollback").unwrap();
        for i in 0..10 {
            assert_eq!(read(&target, &format!("file{i}.js")), format!("old {i}"));
        }
    }

    #[test]
    fn test_protected_survive_even_when_mirror_fails() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        let backups = temp.path().join("backups");

        write(&target, ".env", "TOKEN=secret");
        write(&source, "app.js", "new");
        write(&source, "conflict", "file");
        fs::create_dir_all(target.join("conflict/leftover")).unwrap();
        write(&target, "conflict/leftover/data.txt", "nested");

        let protected = vec![PathBuf::from(".env")];
        let err = atomic_replace(&source, &target, &protected, &backups, "1.3.0");
        assert!(err.is_err());

        // The live copy was never touched, and the snapshot exists too.
        assert_eq!(read(&target, ".env"), "TOKEN=secret");
        let backup = err.unwrap_err().backup_path().unwrap().to_path_buf();
        assert_eq!(read(&backup, ".env"), "TOKEN=secret");
    }

    #[test]
    fn test_missing_source_fails_without_backup() {
        let temp = TempDir::new().unwrap();
        let err = atomic_replace(
            &temp.path().join("missing"),
            temp.path(),
            &[],
            &temp.path().join("backups"),
            "1.3.0",
        )
        .unwrap_err();
        assert!(err.backup_path().is_none());
    }
}
