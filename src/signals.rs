// Top-level termination handling (spec.md §5 "Cancellation"): external
// interrupt/terminate/hangup signals roll back whatever transaction is
// active before the process exits, instead of leaving the store half
// written. Best-effort only — a signal the handler can't catch (SIGKILL)
// leaves scratch directories under TMP_DIR for the next `cleanup` pass to
// remove, exactly as spec.md §5 allows.

use crate::{log_debug, log_warn};
use crate::transaction;

/// Installs the process-wide handler. Call once, early in `main`, before
/// any `Transaction` is created.
pub fn install_handler() {
    let result = ctrlc::set_handler(on_signal);
    if let Err(e) = result {
        log_warn!("failed to install termination signal handler: {e}");
    }
}

fn on_signal() {
    match transaction::rollback_active_for_signal() {
        Some(0) => log_debug!("[signal] rolled back the active transaction cleanly"),
        Some(failed) => log_warn!("[signal] rollback completed with {failed} failed step(s)"),
        None => log_debug!("[signal] no active transaction to roll back"),
    }
    std::process::exit(130);
}
