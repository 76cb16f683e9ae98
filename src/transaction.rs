// C2 — Transaction: a single-writer, process-local compensating-action log.
// Every mutation the Store and Resolver make goes through one of the
// helpers here instead of a raw `std::fs` call, so that any failure deep in
// an install can be undone by replaying the recorded actions in LIFO order.
//
// Grounded in the spec's own design note (§9): "Compensating-action log vs.
// write-ahead log" — chosen because every mutation here is a local
// filesystem change with an obvious inverse. The teacher crate doesn't have
// an equivalent (its installers either succeed outright or leave a partial
// `~/bin/<tool>` behind), so this module has no direct teacher file to
// generalize; it follows the teacher's general shape for this kind of
// stateful helper (a struct owning a `Vec` of actions, `log_debug!`/
// `log_warn!` on every step, plain `io::Result` plumbing) as seen across
// `libs/state_management.rs` and `libs/utilities/*.rs`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use crate::fsutil::{create_symlink, is_symlink};
use crate::{log_debug, log_warn};

type CompensatingAction = Box<dyn FnOnce() -> bool + Send>;

struct ActiveTransaction {
    kind: String,
    context: String,
    backup_dir: PathBuf,
    steps: Vec<CompensatingAction>,
}

/// Runs every recorded action in LIFO order, never short-circuiting on an
/// individual failure. Shared between `Transaction::rollback` and the
/// termination-signal handler (`crate::signals`) so both paths undo a
/// half-finished install the same way.
fn execute_rollback(tx: ActiveTransaction) -> usize {
    log_debug!("[tx] rolling back {} ({}): {} step(s)", tx.kind, tx.context, tx.steps.len());
    let mut failed = 0;
    for action in tx.steps.into_iter().rev() {
        if !action() {
            failed += 1;
        }
    }
    if failed > 0 {
        log_warn!("[tx] rollback completed with {failed} failed step(s)");
    }
    failed
}

/// Process-wide slot holding the currently active transaction's shared
/// state, if any (spec.md §3: "at most one Transaction is active per
/// process"). `crate::signals`'s termination handler locks this to run
/// rollback from outside the normal call stack when the process is
/// interrupted mid-operation (spec.md §5 "Cancellation").
static GLOBAL_ACTIVE: Mutex<Option<Arc<Mutex<Option<ActiveTransaction>>>>> = Mutex::new(None);

/// Best-effort: if a transaction is active anywhere in the process, rolls
/// it back and returns the failed-step count. Called by the termination
/// signal handler, never by normal control flow.
pub(crate) fn rollback_active_for_signal() -> Option<usize> {
    let slot = GLOBAL_ACTIVE.lock().ok()?.take()?;
    let tx = slot.lock().ok()?.take()?;
    Some(execute_rollback(tx))
}

/// Anchors the janitor sweep to "don't touch this transaction's own backup
/// directory" (spec.md §9 open question #1): a transaction that runs past
/// the one-hour mark would otherwise have its own rollback data swept out
/// from under it.
pub struct Transaction {
    tmp_dir: PathBuf,
    active: Arc<Mutex<Option<ActiveTransaction>>>,
}

impl Transaction {
    pub fn new(tmp_dir: impl Into<PathBuf>) -> Self {
        Transaction { tmp_dir: tmp_dir.into(), active: Arc::new(Mutex::new(None)) }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// `begin(type, context) -> ok | AlreadyActive`.
    pub fn begin(&mut self, kind: &str, context: &str) -> Result<(), String> {
        let mut guard = self.active.lock().map_err(|_| "transaction lock poisoned".to_string())?;
        if guard.is_some() {
            return Err("a transaction is already active".to_string());
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.f").to_string();
        let backup_dir = self.tmp_dir.join("backup").join(&stamp);
        log_debug!("[tx] begin {kind} ({context}), backups under {}", backup_dir.display());
        *guard = Some(ActiveTransaction {
            kind: kind.to_string(),
            context: context.to_string(),
            backup_dir,
            steps: Vec::new(),
        });
        drop(guard);

        // Register this transaction's shared state globally so a
        // termination signal can roll it back from outside this call stack.
        if let Ok(mut global) = GLOBAL_ACTIVE.lock() {
            *global = Some(self.active.clone());
        }
        Ok(())
    }

    /// `record(action)` — appends a compensating action; no-op warning if no
    /// active transaction.
    fn record(&mut self, action: CompensatingAction) {
        match self.active.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(tx) => tx.steps.push(action),
                None => log_warn!("[tx] record() called with no active transaction; action discarded"),
            },
            Err(_) => log_warn!("[tx] record() called on a poisoned transaction lock; action discarded"),
        }
    }

    fn unregister_global(&self) {
        if let Ok(mut global) = GLOBAL_ACTIVE.lock() {
            if global.as_ref().is_some_and(|g| Arc::ptr_eq(g, &self.active)) {
                *global = None;
            }
        }
    }

    /// `commit() -> ok` — clears state, discards actions without executing them.
    pub fn commit(&mut self) {
        let taken = self.active.lock().ok().and_then(|mut g| g.take());
        if let Some(tx) = taken {
            log_debug!("[tx] commit {} ({}): discarding {} recorded action(s)", tx.kind, tx.context, tx.steps.len());
        }
        self.unregister_global();
    }

    /// `rollback() -> ok(failed_count)` — executes actions in **LIFO** order.
    /// Never short-circuits on an individual action's failure; clears state
    /// regardless.
    pub fn rollback(&mut self) -> usize {
        let taken = self.active.lock().ok().and_then(|mut g| g.take());
        self.unregister_global();
        match taken {
            Some(tx) => execute_rollback(tx),
            None => 0,
        }
    }

    fn backup_dir(&self) -> Option<PathBuf> {
        self.active.lock().ok()?.as_ref().map(|tx| tx.backup_dir.clone())
    }

    fn next_backup_path(&self, original: &Path) -> Option<PathBuf> {
        let dir = self.backup_dir()?;
        let name = original.file_name().unwrap_or_default();
        // Disambiguate collisions (e.g. two removals of paths sharing a
        // basename within the same transaction) with a numeric suffix.
        let mut candidate = dir.join(name);
        let mut n = 0u32;
        while candidate.exists() || is_symlink(&candidate) {
            n += 1;
            candidate = dir.join(format!("{}.{n}", name.to_string_lossy()));
        }
        Some(candidate)
    }

    /// `record_remove(path)` — if `path` exists (file, dir, or symlink),
    /// move it into this transaction's backup directory and register a
    /// compensator that restores it. Then removes `path` for the caller.
    pub fn record_remove(&mut self, path: &Path) -> io::Result<()> {
        if !path.exists() && !is_symlink(path) {
            return Ok(());
        }
        let backup = self.next_backup_path(path).ok_or_else(|| {
            io::Error::other("record_remove called with no active transaction")
        })?;
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(path, &backup)?;
        let restore_to = path.to_path_buf();
        let restore_from = backup.clone();
        self.record(Box::new(move || match move_path(&restore_from, &restore_to) {
            Ok(()) => true,
            Err(e) => {
                log_warn!("[tx] rollback: failed to restore {} from backup: {e}", restore_to.display());
                false
            }
        }));
        Ok(())
    }

    /// `record_symlink(target, link)` — captures any prior state at `link`
    /// (symlink, regular file/dir, or absent) so rollback restores it
    /// exactly, then creates the new symlink.
    pub fn record_symlink(&mut self, target: &Path, link: &Path) -> io::Result<()> {
        enum Prior {
            Absent,
            Symlink(PathBuf),
            Other(PathBuf),
        }

        let prior = if is_symlink(link) {
            Prior::Symlink(fs::read_link(link)?)
        } else if link.exists() {
            let backup = self.next_backup_path(link).ok_or_else(|| {
                io::Error::other("record_symlink called with no active transaction")
            })?;
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent)?;
            }
            move_path(link, &backup)?;
            Prior::Other(backup)
        } else {
            Prior::Absent
        };

        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        create_symlink(target, link)?;

        let link_owned = link.to_path_buf();
        self.record(Box::new(move || {
            let _ = fs::remove_file(&link_owned);
            match prior {
                Prior::Absent => true,
                Prior::Symlink(old_target) => create_symlink(&old_target, &link_owned).is_ok(),
                Prior::Other(backup) => move_path(&backup, &link_owned).is_ok(),
            }
        }));
        Ok(())
    }

    /// `record_mkdir(path)` — creates `path` (and parents) if missing; only
    /// records a compensating removal if the directory did not pre-exist.
    pub fn record_mkdir(&mut self, path: &Path) -> io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(path)?;
        let owned = path.to_path_buf();
        self.record(Box::new(move || match fs::remove_dir_all(&owned) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                log_warn!("[tx] rollback: failed to remove created directory {}: {e}", owned.display());
                false
            }
        }));
        Ok(())
    }

    /// `safe_move(src, dst)` — performs the move, registering a compensator
    /// that reverses it (restoring any pre-existing destination from
    /// backup).
    pub fn safe_move(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
        let prior_dst = self.backup_existing(dst)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(src, dst)?;

        let src_owned = src.to_path_buf();
        let dst_owned = dst.to_path_buf();
        self.record(Box::new(move || {
            let moved_back = move_path(&dst_owned, &src_owned).is_ok();
            let restored = match prior_dst {
                Some(backup) => move_path(&backup, &dst_owned).is_ok(),
                None => true,
            };
            moved_back && restored
        }));
        Ok(())
    }

    /// `safe_copy(src, dst)` — performs the copy, registering a compensator
    /// that reverses it.
    pub fn safe_copy(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
        let prior_dst = self.backup_existing(dst)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;

        let dst_owned = dst.to_path_buf();
        self.record(Box::new(move || {
            let removed = fs::remove_file(&dst_owned).is_ok();
            let restored = match prior_dst {
                Some(backup) => move_path(&backup, &dst_owned).is_ok(),
                None => true,
            };
            removed && restored
        }));
        Ok(())
    }

    fn backup_existing(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        if !path.exists() && !is_symlink(path) {
            return Ok(None);
        }
        let backup = self.next_backup_path(path).ok_or_else(|| {
            io::Error::other("backup_existing called with no active transaction")
        })?;
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(path, &backup)?;
        Ok(Some(backup))
    }

    /// Deletes backup directories older than one hour, skipping this
    /// transaction's own (if any) — called on normal termination, i.e.
    /// after a commit, never mid-transaction.
    pub fn sweep_stale_backups(&self) {
        let root = self.tmp_dir.join("backup");
        let Ok(entries) = fs::read_dir(&root) else { return };
        let keep = self.backup_dir();
        let cutoff = Duration::from_secs(3600);
        for entry in entries.flatten() {
            let path = entry.path();
            if Some(&path) == keep.as_ref() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let age = SystemTime::now().duration_since(modified).unwrap_or_default();
            if age > cutoff {
                log_debug!("[tx] janitor: removing stale backup dir {}", path.display());
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}

/// Moves `src` to `dst`, falling back to copy+remove across filesystems —
/// same fallback the teacher's `move_and_rename_binary` implements for
/// `ErrorKind::CrossesDevices`. Transparently moves symlinks (by
/// recreating them) rather than following them.
fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if is_symlink(src) {
        let target = fs::read_link(src)?;
        create_symlink(&target, dst)?;
        fs::remove_file(src)?;
        return Ok(());
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
                fs::remove_dir_all(src)?;
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)?;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_tx(tmp: &Path) -> Transaction {
        Transaction::new(tmp.join("tpm-tmp"))
    }

    #[test]
    fn begin_rejects_second_active_transaction() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        tx.begin("install", "example/hello").unwrap();
        assert!(tx.begin("install", "other/thing").is_err());
    }

    #[test]
    fn commit_clears_state_without_running_actions() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        tx.begin("install", "example/hello").unwrap();
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        tx.record(Box::new(move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            true
        }));
        tx.commit();
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!tx.is_active());
    }

    #[test]
    fn rollback_runs_actions_lifo_and_counts_failures() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        tx.begin("install", "example/hello").unwrap();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            tx.record(Box::new(move || {
                order.lock().unwrap().push(i);
                i != 1 // step 1 "fails"
            }));
        }
        let failed = tx.rollback();
        assert_eq!(failed, 1);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(!tx.is_active());
    }

    #[test]
    fn signal_rollback_runs_actions_of_the_active_transaction() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        tx.begin("install", "example/hello").unwrap();
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        tx.record(Box::new(move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            true
        }));

        let failed = rollback_active_for_signal();
        assert_eq!(failed, Some(0));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        // The signal path already consumed the state; a normal rollback
        // afterwards finds nothing left to undo.
        assert_eq!(tx.rollback(), 0);
    }

    #[test]
    fn record_remove_restores_file_on_rollback() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let target = root.path().join("file.txt");
        fs::write(&target, b"hello").unwrap();

        tx.begin("remove", "example/hello").unwrap();
        tx.record_remove(&target).unwrap();
        assert!(!target.exists());
        tx.rollback();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn record_remove_on_missing_path_is_noop() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        tx.begin("remove", "example/hello").unwrap();
        tx.record_remove(&root.path().join("does-not-exist")).unwrap();
        assert_eq!(tx.rollback(), 0);
    }

    #[test]
    fn record_symlink_restores_prior_symlink() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let target_a = root.path().join("a");
        let target_b = root.path().join("b");
        fs::write(&target_a, b"a").unwrap();
        fs::write(&target_b, b"b").unwrap();
        let link = root.path().join("link");
        create_symlink(&target_a, &link).unwrap();

        tx.begin("update", "example/hello").unwrap();
        tx.record_symlink(&target_b, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target_b);
        tx.rollback();
        assert_eq!(fs::read_link(&link).unwrap(), target_a);
    }

    #[test]
    fn record_symlink_restores_absent_state() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let target = root.path().join("bin-target");
        fs::write(&target, b"x").unwrap();
        let link = root.path().join("link");

        tx.begin("install", "example/hello").unwrap();
        tx.record_symlink(&target, &link).unwrap();
        assert!(link.exists());
        tx.rollback();
        assert!(!link.exists() && !is_symlink(&link));
    }

    #[test]
    fn record_mkdir_only_removes_if_it_created_it() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let pre_existing = root.path().join("already-here");
        fs::create_dir_all(&pre_existing).unwrap();
        let fresh = root.path().join("fresh");

        tx.begin("install", "example/hello").unwrap();
        tx.record_mkdir(&pre_existing).unwrap();
        tx.record_mkdir(&fresh).unwrap();
        tx.rollback();
        assert!(pre_existing.exists(), "pre-existing directory must survive rollback");
        assert!(!fresh.exists(), "freshly created directory must be removed on rollback");
    }

    #[test]
    fn safe_move_reverses_and_restores_destination() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let src = root.path().join("src.bin");
        let dst = root.path().join("dst.bin");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        tx.begin("install", "example/hello").unwrap();
        tx.safe_move(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");
        tx.rollback();
        assert_eq!(fs::read_to_string(&src).unwrap(), "new");
        assert_eq!(fs::read_to_string(&dst).unwrap(), "old");
    }

    #[test]
    fn sweep_stale_backups_skips_active_transaction_dir() {
        let root = tempdir().unwrap();
        let mut tx = new_tx(root.path());
        let target = root.path().join("file.txt");
        fs::write(&target, b"hello").unwrap();
        tx.begin("remove", "example/hello").unwrap();
        tx.record_remove(&target).unwrap();
        // The active transaction's own backup dir must survive a sweep even
        // though we can't make it look "old" without messing with mtimes.
        tx.sweep_stale_backups();
        tx.rollback();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }
}
