// C6 — Orchestrator: composes the Transaction (C2), Manifest (C3), Store
// (C4), and Release Resolver (C5) into the operations the CLI exposes
// (spec.md §4.6): `install`, `update`, `remove`, `repair`, `cleanup`,
// `info`, `list`.
//
// Grounded in the teacher's `commands/now.rs` for the overall shape of a
// top-level command function that resolves paths/state once, then walks
// through a fixed sequence of subsystem calls, logging progress at each
// step and returning a summary the CLI prints. Every mutating operation
// here begins a Transaction before touching the filesystem and rolls it
// back on any failure, which `now.rs` has no need for (its installers
// have no transactional rollback) — that part is pulled from spec.md §2's
// data-flow description instead.

use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{Result, TpmError};
use crate::lock::Lock;
use crate::manifest::{AddError, Manifest, ManifestPatch};
use crate::resolver::{scoring, Resolver, Transport};
use crate::schema::{InstalledTool, ToolId, Version};
use crate::store;
use crate::store::versions;
use crate::transaction::Transaction;
use crate::{log_debug, log_info, log_warn};

const KEEP_VERSIONS: usize = 3;

/// Outcome of a single `install`/`update` for one tool — enough for the
/// CLI to print a one-line summary.
pub struct InstallReport {
    pub tool: ToolId,
    pub version: Version,
    pub binary: String,
    pub symlink_path: PathBuf,
}

/// `install(tool_id, force?)` (spec.md §4.6). Refuses an already-installed
/// tool unless `force`. Any failure past `begin()` triggers rollback and
/// is reported as `TransactionAborted`.
pub fn install<T: Transport>(
    config: &Config,
    resolver: &Resolver<T>,
    manifest: &mut Manifest,
    id: &ToolId,
    force: bool,
) -> Result<InstallReport> {
    let already_installed = manifest.installed(id);
    if already_installed && !force {
        return Err(TpmError::AlreadyExists(id.clone()));
    }

    let _lock = Lock::acquire_tool(&config.locks_dir(), &id.owner, &id.repo)?;
    let mut tx = Transaction::new(config.tmp_dir.clone());
    tx.begin("install", &id.to_string()).map_err(TpmError::Busy)?;

    // `already_installed` (not `force`) decides add-vs-update: a forced
    // reinstall of a tool with no existing record must still go through
    // `manifest.add`, not `manifest.update`.
    match run_install(config, resolver, manifest, id, &mut tx, already_installed) {
        Ok(report) => {
            tx.commit();
            tx.sweep_stale_backups();
            if let Err(e) = manifest.save() {
                log_warn!("[orchestrator] install succeeded but manifest save failed (will retry on exit): {e}");
            }
            Ok(report)
        }
        Err(e) => {
            let failed_steps = tx.rollback();
            Err(TpmError::TransactionAborted {
                context: format!("install {id}"),
                failed_steps,
                inner: Box::new(e),
            })
        }
    }
}

fn run_install<T: Transport>(
    config: &Config,
    resolver: &Resolver<T>,
    manifest: &mut Manifest,
    id: &ToolId,
    tx: &mut Transaction,
    is_update: bool,
) -> Result<InstallReport> {
    log_debug!("[orchestrator] resolving latest release for {id}");
    let release = resolver.get_latest_release(&id.owner, &id.repo)?;
    let version = Version::new(release.tag_name.clone());

    let scored = scoring::pick_best_asset(&release.assets, config.arch).ok_or_else(|| {
        TpmError::NotFound(format!(
            "no suitable asset for {id}; available assets: {}",
            release.assets.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
        ))
    })?;
    if scored.score < 0 {
        log_warn!(
            "[orchestrator] best asset '{}' for {id} scored negative ({}); proceeding anyway",
            scored.asset.name,
            scored.score
        );
    }
    let asset_name = scored.asset.name.clone();
    let asset_url = scored.asset.browser_download_url.clone();
    let checksum = crate::resolver::find_checksum(&release.body, &asset_name);

    log_info!("[orchestrator] downloading {asset_name} for {id} {version}");
    fs::create_dir_all(&config.tmp_dir).map_err(|e| TpmError::fs(&config.tmp_dir, e))?;
    let download_path = config.tmp_dir.join(&asset_name);
    resolver.download_asset(&asset_url, &download_path, checksum.as_deref())?;

    let scratch_dir = config.tmp_dir.join("extract").join(format!("{}-{}", id.repo, std::process::id()));
    fs::create_dir_all(&scratch_dir).map_err(|e| TpmError::fs(&scratch_dir, e))?;

    let outcome = store::install_to_store(
        tx,
        &config.store_root,
        &id.owner,
        &id.repo,
        &version,
        config.arch,
        &download_path,
        &asset_name,
        &scratch_dir,
        None,
    )?;
    let _ = fs::remove_file(&download_path);
    let _ = fs::remove_dir_all(&scratch_dir);

    versions::set_current(&config.store_root, &id.owner, &id.repo, &outcome.sanitized_version)?;

    let symlink_path = store::publish_symlink(tx, &config.bin_dir, &id.repo, &outcome.store_bin_path)?;

    let checksum_field = checksum.clone();
    if is_update {
        manifest
            .update(
                id,
                ManifestPatch {
                    version: Some(version.clone()),
                    binary: Some(outcome.binary_name.clone()),
                    store_path: Some(outcome.store_bin_path.to_string_lossy().to_string()),
                    symlink_path: Some(symlink_path.to_string_lossy().to_string()),
                    installed_at: Some(chrono::Utc::now().to_rfc3339()),
                    checksum: Some(checksum_field),
                    files: Some(outcome.files.clone()),
                },
            )
            .map_err(|_| TpmError::Internal(format!("manifest update for {id} lost its record mid-transaction")))?;
    } else {
        let record = InstalledTool {
            tool: id.clone(),
            version: version.clone(),
            binary: outcome.binary_name.clone(),
            store_path: outcome.store_bin_path.to_string_lossy().to_string(),
            symlink_path: symlink_path.to_string_lossy().to_string(),
            installed_at: String::new(),
            checksum: checksum_field,
            files: outcome.files.clone(),
            extras: Default::default(),
        };
        manifest.add(record).map_err(|e| match e {
            AddError::AlreadyExists => TpmError::AlreadyExists(id.clone()),
            AddError::MissingField(f) => TpmError::Internal(format!("manifest record missing required field {f}")),
        })?;
    }

    Ok(InstallReport { tool: id.clone(), version, binary: outcome.binary_name, symlink_path })
}

/// `update(tool_id)`: resolves the latest version; skips if it equals the
/// currently recorded one; otherwise runs the install path again (as an
/// update, replacing the manifest record rather than adding one) and
/// prunes old versions on success.
pub fn update<T: Transport>(
    config: &Config,
    resolver: &Resolver<T>,
    manifest: &mut Manifest,
    id: &ToolId,
) -> Result<Option<InstallReport>> {
    let Some(current) = manifest.get(id) else {
        return Err(TpmError::NotFound(format!("{id} is not installed")));
    };
    let current_version = current.version.clone();

    let _lock = Lock::acquire_tool(&config.locks_dir(), &id.owner, &id.repo)?;

    let release = resolver.get_latest_release(&id.owner, &id.repo)?;
    let latest = Version::new(release.tag_name.clone());
    if latest.compare(&current_version) == std::cmp::Ordering::Equal {
        log_info!("[orchestrator] {id} already at latest version {latest}");
        return Ok(None);
    }

    let mut tx = Transaction::new(config.tmp_dir.clone());
    tx.begin("update", &id.to_string()).map_err(TpmError::Busy)?;

    match run_install(config, resolver, manifest, id, &mut tx, true) {
        Ok(report) => {
            tx.commit();
            let pruned = versions::cleanup_old_versions(&config.store_root, &id.owner, &id.repo, KEEP_VERSIONS);
            if pruned > 0 {
                log_debug!("[orchestrator] pruned {pruned} old version(s) of {id} after update");
            }
            tx.sweep_stale_backups();
            if let Err(e) = manifest.save() {
                log_warn!("[orchestrator] update succeeded but manifest save failed (will retry on exit): {e}");
            }
            Ok(Some(report))
        }
        Err(e) => {
            let failed_steps = tx.rollback();
            Err(TpmError::TransactionAborted {
                context: format!("update {id}"),
                failed_steps,
                inner: Box::new(e),
            })
        }
    }
}

/// `update --all`: attempts every installed tool; a per-tool failure is
/// collected and reported, it does not abort remaining tools. Holds the
/// manifest-scoped lock for the whole sweep (spec.md §5: global operations
/// lock the manifest, individual tools still take their own lock inside
/// `update`).
pub fn update_all<T: Transport>(
    config: &Config,
    resolver: &Resolver<T>,
    manifest: &mut Manifest,
) -> Result<Vec<(ToolId, Result<Option<InstallReport>>)>> {
    let _lock = Lock::acquire_manifest(&config.locks_dir())?;
    let ids: Vec<ToolId> = manifest.iter().map(|r| r.tool.clone()).collect();
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        let outcome = update(config, resolver, manifest, &id);
        if let Err(e) = &outcome {
            log_warn!("[orchestrator] update of {id} failed: {e}");
        }
        results.push((id, outcome));
    }
    Ok(results)
}

/// `remove(tool_id)`: removes the `PATH` symlink and the `current`
/// pointer and drops the manifest record. The version directory itself
/// is left in the store (spec.md §8 scenario 5 says it "may remain,
/// pruned by cleanup") — see DESIGN.md for why this reading is preferred
/// over §4.6's more literal "remove the version directory" phrasing.
pub fn remove(config: &Config, manifest: &mut Manifest, id: &ToolId) -> Result<InstalledTool> {
    let Some(record) = manifest.get(id).cloned() else {
        return Err(TpmError::NotFound(format!("{id} is not installed")));
    };

    let _lock = Lock::acquire_tool(&config.locks_dir(), &id.owner, &id.repo)?;
    let mut tx = Transaction::new(config.tmp_dir.clone());
    tx.begin("remove", &id.to_string()).map_err(TpmError::Busy)?;

    let result = (|| -> Result<()> {
        let symlink_path = std::path::PathBuf::from(&record.symlink_path);
        tx.record_remove(&symlink_path).map_err(|e| TpmError::fs(&symlink_path, e))?;

        let current_link = versions::current_link(&config.store_root, &id.owner, &id.repo);
        tx.record_remove(&current_link).map_err(|e| TpmError::fs(&current_link, e))?;

        manifest.remove(id).map_err(|_| TpmError::NotFound(format!("{id} is not installed")))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            tx.commit();
            tx.sweep_stale_backups();
            if let Err(e) = manifest.save() {
                log_warn!("[orchestrator] remove succeeded but manifest save failed (will retry on exit): {e}");
            }
            Ok(record)
        }
        Err(e) => {
            let failed_steps = tx.rollback();
            Err(TpmError::TransactionAborted { context: format!("remove {id}"), failed_steps, inner: Box::new(e) })
        }
    }
}

pub struct RepairReport {
    pub symlinks_repaired: usize,
    pub store_errors: Vec<String>,
}

/// `repair`: recreates broken manifest symlinks, then reports any
/// remaining store-side inconsistencies `repair_symlinks` can't fix
/// (broken `current` pointers, empty `bin/` directories). Locks the
/// manifest for the duration, per spec.md §5.
pub fn repair(config: &Config, manifest: &mut Manifest) -> Result<RepairReport> {
    let _lock = Lock::acquire_manifest(&config.locks_dir())?;
    let symlinks_repaired = manifest.repair_symlinks();
    if let Err(e) = manifest.save() {
        log_warn!("[orchestrator] repair succeeded but manifest save failed: {e}");
    }
    let store_errors = store::validate_store(&config.store_root);
    Ok(RepairReport { symlinks_repaired, store_errors })
}

/// `cleanup`: prunes old versions for every `(owner, repo)` the manifest
/// currently knows about, keeping the most recent `KEEP_VERSIONS` (and
/// always the `current` one) per tool. Locks the manifest for the
/// duration, per spec.md §5.
pub fn cleanup(config: &Config, manifest: &Manifest) -> Result<usize> {
    let _lock = Lock::acquire_manifest(&config.locks_dir())?;
    let mut total = 0;
    for record in manifest.iter() {
        total += versions::cleanup_old_versions(&config.store_root, &record.tool.owner, &record.tool.repo, KEEP_VERSIONS);
    }
    Ok(total)
}

/// `list` (spec.md §4.6): read-only manifest query.
pub fn list(manifest: &Manifest) -> Vec<&InstalledTool> {
    manifest.iter().collect()
}

/// `info(tool_id)`: read-only manifest query for one tool.
pub fn info<'a>(manifest: &'a Manifest, id: &ToolId) -> Result<&'a InstalledTool> {
    manifest.get(id).ok_or_else(|| TpmError::NotFound(format!("{id} is not installed")))
}
