// Version-directory bookkeeping within one tool's store tree (spec.md
// §4.4 "Versioning"): enumerate, read/set the `current` pointer, and
// prune old versions while never touching the one in use.
//
// The teacher has no analogue — its installs are unversioned, overwritten
// in place under a single `install_path` — so this follows the general
// shape of the teacher's other store-adjacent helpers (plain functions
// over `PathBuf`s, `log_debug!`/`log_warn!` at each step) rather than
// generalizing a specific teacher file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TpmError};
use crate::fsutil;
use crate::schema::Version;
use crate::{log_debug, log_warn};

pub fn tool_dir(store_root: &Path, owner: &str, repo: &str) -> PathBuf {
    store_root.join(owner).join(repo)
}

pub fn current_link(store_root: &Path, owner: &str, repo: &str) -> PathBuf {
    tool_dir(store_root, owner, repo).join("current")
}

/// Every sanitized version directory under `STORE_ROOT/<owner>/<repo>`,
/// sorted ascending by normalized version (the `current` symlink itself
/// is not a version directory and is excluded).
pub fn installed_versions(store_root: &Path, owner: &str, repo: &str) -> Vec<String> {
    let dir = tool_dir(store_root, owner, repo);
    let Ok(entries) = fs::read_dir(&dir) else { return Vec::new() };

    let mut versions: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name() != "current")
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();

    versions.sort_by(|a, b| Version::new(a).compare(&Version::new(b)));
    versions
}

/// Reads the `current` symlink; if missing or broken, the caller should
/// fall back to a manifest lookup (the spec's documented fallback order).
pub fn current_version(store_root: &Path, owner: &str, repo: &str) -> Option<String> {
    let link = current_link(store_root, owner, repo);
    let target = fs::read_link(&link).ok()?;
    let name = target.file_name()?.to_str()?.to_string();
    if tool_dir(store_root, owner, repo).join(&name).is_dir() {
        Some(name)
    } else {
        None
    }
}

/// Atomically repoints `current` at `sanitized_version`. Fails if that
/// version directory does not exist.
pub fn set_current(store_root: &Path, owner: &str, repo: &str, sanitized_version: &str) -> Result<()> {
    let dir = tool_dir(store_root, owner, repo);
    let version_dir = dir.join(sanitized_version);
    if !version_dir.is_dir() {
        return Err(TpmError::NotFound(format!(
            "version directory {} does not exist",
            version_dir.display()
        )));
    }

    let link = dir.join("current");
    let tmp_link = dir.join(".current.tmp");
    let _ = fs::remove_file(&tmp_link);
    fsutil::create_symlink(Path::new(sanitized_version), &tmp_link).map_err(|e| TpmError::fs(&tmp_link, e))?;
    fs::rename(&tmp_link, &link).map_err(|e| TpmError::fs(&link, e))?;
    Ok(())
}

/// Deletes oldest version directories until only `keep` remain, never
/// deleting the version `current` points at regardless of age ordering
/// (spec.md §4.4, §8 boundary behavior). If `current` happens to be the
/// oldest, the removal budget is not topped up with an extra deletion —
/// fewer than `keep`-short directories may end up pruned. That is the
/// documented source behavior (spec.md §9 open question), kept as-is.
pub fn cleanup_old_versions(store_root: &Path, owner: &str, repo: &str, keep: usize) -> usize {
    let versions = installed_versions(store_root, owner, repo);
    if versions.len() <= keep {
        return 0;
    }
    let current = current_version(store_root, owner, repo);
    let dir = tool_dir(store_root, owner, repo);

    let to_remove = versions.len() - keep;
    let mut removed = 0;
    for version in versions.iter() {
        if removed >= to_remove {
            break;
        }
        if Some(version.as_str()) == current.as_deref() {
            continue;
        }
        let path = dir.join(version);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                log_debug!("[store] pruned old version directory {}", path.display());
                removed += 1;
            }
            Err(e) => log_warn!("[store] failed to prune {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_version(store_root: &Path, owner: &str, repo: &str, version: &str) {
        fs::create_dir_all(tool_dir(store_root, owner, repo).join(version)).unwrap();
    }

    #[test]
    fn installed_versions_sorted_ascending() {
        let root = tempdir().unwrap();
        for v in ["2.0.0", "1.0.0", "1.10.0", "1.9.0"] {
            make_version(root.path(), "ex", "hello", v);
        }
        assert_eq!(
            installed_versions(root.path(), "ex", "hello"),
            vec!["1.0.0", "1.9.0", "1.10.0", "2.0.0"]
        );
    }

    #[test]
    fn set_current_then_read_back() {
        let root = tempdir().unwrap();
        make_version(root.path(), "ex", "hello", "1.0.0");
        set_current(root.path(), "ex", "hello", "1.0.0").unwrap();
        assert_eq!(current_version(root.path(), "ex", "hello"), Some("1.0.0".to_string()));
    }

    #[test]
    fn set_current_fails_for_missing_version() {
        let root = tempdir().unwrap();
        make_version(root.path(), "ex", "hello", "1.0.0");
        assert!(set_current(root.path(), "ex", "hello", "9.9.9").is_err());
    }

    #[test]
    fn cleanup_keeps_current_even_if_oldest() {
        let root = tempdir().unwrap();
        for v in ["1.0.0", "1.1.0", "1.2.0", "1.3.0", "1.4.0"] {
            make_version(root.path(), "ex", "hello", v);
        }
        set_current(root.path(), "ex", "hello", "1.0.0").unwrap();

        let removed = cleanup_old_versions(root.path(), "ex", "hello", 3);

        let remaining = installed_versions(root.path(), "ex", "hello");
        assert!(remaining.contains(&"1.0.0".to_string()), "current must survive pruning");
        assert_eq!(removed, 2);
    }

    #[test]
    fn cleanup_is_noop_when_within_budget() {
        let root = tempdir().unwrap();
        for v in ["1.0.0", "1.1.0"] {
            make_version(root.path(), "ex", "hello", v);
        }
        assert_eq!(cleanup_old_versions(root.path(), "ex", "hello", 3), 0);
    }
}
