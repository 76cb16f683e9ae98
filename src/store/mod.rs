// C4 — Store: the versioned on-disk layout (spec.md §4.4), built on top
// of the Transaction (C2) helpers so every mutation here is automatically
// undone on a failed install/update.
//
// Grounded in the teacher's installer flow (`installers/github.rs`) for
// the overall "extract, locate binary, place it, symlink it" sequence,
// and its `libs/utilities/{compression,binary}.rs` for the extraction and
// identification steps themselves (see `extract.rs`/`binary.rs`). The
// versioned-directory-plus-`current`-pointer layout and the transactional
// wiring have no teacher analogue (the teacher installs unversioned, in
// place) and are built directly from spec.md §3/§4.4.

pub mod binary;
pub mod extract;
pub mod versions;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use walkdir::WalkDir;

use crate::config::Arch;
use crate::error::{Result, TpmError};
use crate::fsutil;
use crate::schema::{StoreMetadata, Version};
use crate::transaction::Transaction;
use crate::{log_debug, log_warn};

pub struct InstallOutcome {
    pub store_bin_path: PathBuf,
    pub binary_name: String,
    pub sanitized_version: String,
    pub files: Vec<String>,
}

/// Prepares the version directory, extracts `archive_path`, identifies
/// the principal binary, moves it into `bin/<binary_name>`, and
/// best-effort-copies any other top-level directories (`lib/`, `share/`,
/// …) alongside it. Writes `manifest.json`. Does not publish the `PATH`
/// symlink — that is `publish_symlink`'s job, called separately by the
/// orchestrator once the manifest record is ready to be written too.
#[allow(clippy::too_many_arguments)]
pub fn install_to_store(
    tx: &mut Transaction,
    store_root: &Path,
    owner: &str,
    repo: &str,
    version: &Version,
    arch: Arch,
    archive_path: &Path,
    archive_name: &str,
    scratch_dir: &Path,
    expected_binary: Option<&str>,
) -> Result<InstallOutcome> {
    let sanitized = version.sanitized();
    let dir = versions::tool_dir(store_root, owner, repo);
    let version_dir = dir.join(&sanitized);

    if version_dir.exists() {
        tx.record_remove(&version_dir).map_err(|e| TpmError::fs(&version_dir, e))?;
    }
    tx.record_mkdir(&version_dir).map_err(|e| TpmError::fs(&version_dir, e))?;

    let extracted = extract::extract_archive(archive_path, archive_name, scratch_dir)?;

    let located = binary::locate_binary(&extracted, expected_binary).ok_or_else(|| {
        TpmError::NotFound(format!("no executable found in {} for {owner}/{repo}", extracted.display()))
    })?;

    let binary_name = expected_binary
        .map(str::to_string)
        .unwrap_or_else(|| located.file_name().unwrap_or_default().to_string_lossy().to_string());

    let bin_dir = version_dir.join("bin");
    tx.record_mkdir(&bin_dir).map_err(|e| TpmError::fs(&bin_dir, e))?;
    let store_bin_path = bin_dir.join(&binary_name);
    tx.safe_move(&located, &store_bin_path).map_err(|e| TpmError::fs(&store_bin_path, e))?;
    fsutil::set_executable(&store_bin_path).map_err(|e| TpmError::fs(&store_bin_path, e))?;

    copy_auxiliary_trees(&extracted, &version_dir, &bin_dir);

    let files = relative_file_list(&version_dir);
    let metadata = StoreMetadata {
        tool: format!("{owner}/{repo}"),
        version: version.as_str().to_string(),
        architecture: arch.as_str().to_string(),
        installed_at: Utc::now().to_rfc3339(),
        store_path: store_bin_path.to_string_lossy().to_string(),
        binary: binary_name.clone(),
        binary_path: format!("bin/{binary_name}"),
        files: files.join(","),
    };
    let metadata_path = version_dir.join("manifest.json");
    let rendered = serde_json::to_string_pretty(&metadata).map_err(|e| {
        TpmError::Internal(format!("failed to render store metadata: {e}"))
    })?;
    fs::write(&metadata_path, rendered).map_err(|e| TpmError::fs(&metadata_path, e))?;

    Ok(InstallOutcome { store_bin_path, binary_name, sanitized_version: sanitized, files })
}

/// Copies every top-level entry of the extracted tree other than the
/// binary's own directory into the version directory — `lib/`, `share/`,
/// and anything else a release ships alongside its binaries. Best-effort:
/// a failure here is logged, not propagated, per spec.md §4.4.
fn copy_auxiliary_trees(extracted: &Path, version_dir: &Path, bin_dir: &Path) {
    let Ok(entries) = fs::read_dir(extracted) else { return };
    for entry in entries.flatten() {
        let from = entry.path();
        if from == *bin_dir || from.file_name() == bin_dir.file_name() && from.parent() == bin_dir.parent() {
            continue;
        }
        let name = entry.file_name();
        if name == "bin" {
            continue;
        }
        let to = version_dir.join(&name);
        let result = if from.is_dir() { copy_dir_best_effort(&from, &to) } else { fs::copy(&from, &to).map(|_| ()) };
        if let Err(e) = result {
            log_warn!("[store] failed to copy auxiliary path {} into store: {e}", from.display());
        }
    }
}

fn copy_dir_best_effort(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_best_effort(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn relative_file_list(version_dir: &Path) -> Vec<String> {
    WalkDir::new(version_dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(version_dir).ok().map(|p| p.to_string_lossy().to_string()))
        .collect()
}

/// Places `BIN_DIR/<name>` as a symlink to `store_bin_path` (spec.md
/// §4.4 "create_symlink"). No-ops if an existing symlink already resolves
/// to the same target; otherwise records and replaces whatever was there.
pub fn publish_symlink(tx: &mut Transaction, bin_dir: &Path, name: &str, store_bin_path: &Path) -> Result<PathBuf> {
    let link = bin_dir.join(name);
    if fsutil::is_symlink(&link) && fsutil::symlink_resolves_to(&link, store_bin_path) {
        log_debug!("[store] symlink {} already resolves to {}, leaving in place", link.display(), store_bin_path.display());
        return Ok(link);
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| TpmError::fs(parent, e))?;
    }
    tx.record_symlink(store_bin_path, &link).map_err(|e| TpmError::fs(&link, e))?;
    Ok(link)
}

/// Mirror of `Manifest::validate`, from the store's side: walk the tree,
/// flag broken `current` symlinks and version directories with no
/// populated `bin/`.
pub fn validate_store(store_root: &Path) -> Vec<String> {
    let mut errors = Vec::new();
    let Ok(owners) = fs::read_dir(store_root) else { return errors };

    for owner_entry in owners.flatten() {
        if !owner_entry.path().is_dir() {
            continue;
        }
        let Ok(repos) = fs::read_dir(owner_entry.path()) else { continue };
        for repo_entry in repos.flatten() {
            let repo_dir = repo_entry.path();
            if !repo_dir.is_dir() {
                continue;
            }
            let current_link = repo_dir.join("current");
            if fsutil::is_symlink(&current_link) {
                match fs::read_link(&current_link) {
                    Ok(target) => {
                        let resolved = repo_dir.join(&target);
                        if !resolved.is_dir() {
                            errors.push(format!("{} does not resolve to an existing version directory", current_link.display()));
                        }
                    }
                    Err(e) => errors.push(format!("{}: unreadable symlink: {e}", current_link.display())),
                }
            }

            let Ok(versions) = fs::read_dir(&repo_dir) else { continue };
            for version_entry in versions.flatten() {
                let version_dir = version_entry.path();
                if version_entry.file_name() == "current" || !version_dir.is_dir() {
                    continue;
                }
                let bin_dir = version_dir.join("bin");
                let populated = fs::read_dir(&bin_dir).map(|mut it| it.next().is_some()).unwrap_or(false);
                if !populated {
                    errors.push(format!("{} has no populated bin/ directory", version_dir.display()));
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn publish_symlink_is_noop_when_already_correct() {
        let root = tempdir().unwrap();
        let bin_dir = root.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let target = root.path().join("store").join("hello");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"x").unwrap();

        let mut tx = Transaction::new(root.path().join("tmp"));
        tx.begin("install", "example/hello").unwrap();
        publish_symlink(&mut tx, &bin_dir, "hello", &target).unwrap();
        publish_symlink(&mut tx, &bin_dir, "hello", &target).unwrap();
        tx.commit();

        assert_eq!(fs::read_link(bin_dir.join("hello")).unwrap(), target);
    }

    #[test]
    fn validate_store_flags_unpopulated_bin_dir() {
        let root = tempdir().unwrap();
        let version_dir = root.path().join("ex").join("hello").join("1.0.0");
        fs::create_dir_all(version_dir.join("bin")).unwrap();
        let errors = validate_store(root.path());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no populated bin/"));
    }

    #[test]
    fn validate_store_flags_broken_current_symlink() {
        let root = tempdir().unwrap();
        let repo_dir = root.path().join("ex").join("hello");
        fs::create_dir_all(repo_dir.join("1.0.0").join("bin")).unwrap();
        fs::write(repo_dir.join("1.0.0").join("bin").join("hello"), b"x").unwrap();
        fsutil::create_symlink(Path::new("9.9.9"), &repo_dir.join("current")).unwrap();

        let errors = validate_store(root.path());
        assert!(errors.iter().any(|e| e.contains("does not resolve")));
    }
}
