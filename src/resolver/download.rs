// `download_asset` (spec.md §4.5): download to a temp file, optionally
// verify a checksum, then rename into place. `out_path` always lives under
// TMP_DIR scratch space that the orchestrator removes unconditionally right
// after extraction, so this rename doesn't need to go through the
// transaction's compensating-action log the way store/PATH mutations do.
// Retries transient network failures per the spec's fixed policy (2
// retries, 1s delay).
//
// The teacher's `libs/utilities/assets.rs::download_file` is a single
// unretried `ureq::get(...).call()` into a `File::create`; this keeps
// that shape for the actual transfer and wraps it with retry and
// checksum verification, neither of which the teacher does.

use std::fs;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{Result, TpmError};
use crate::resolver::Transport;
use crate::{log_debug, log_warn};

pub fn download_asset<T: Transport>(
    transport: &T,
    max_retries: u32,
    retry_delay: Duration,
    url: &str,
    out_path: &Path,
    expected_checksum: Option<&str>,
) -> Result<()> {
    let temp_path = out_path.with_extension("download");

    let mut attempt = 0;
    let mut last_err = None;
    loop {
        match transport.download(url, &temp_path) {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(e) => {
                log_warn!("[resolver] download attempt {} of {} failed for {url}: {e}", attempt + 1, max_retries + 1);
                last_err = Some(e);
                if attempt >= max_retries {
                    break;
                }
                attempt += 1;
                std::thread::sleep(retry_delay);
            }
        }
    }
    if let Some(e) = last_err {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Some(expected) = expected_checksum {
        verify_checksum(&temp_path, expected)?;
    }

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| TpmError::fs(parent, e))?;
    }
    fs::rename(&temp_path, out_path).map_err(|e| TpmError::fs(out_path, e))?;
    Ok(())
}

fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let Some((algo, hex)) = expected.split_once(':') else {
        log_warn!("[resolver] malformed checksum spec '{expected}', skipping verification");
        return Ok(());
    };

    if algo != "sha256" {
        log_warn!("[resolver] no {algo} digest utility available, accepting {} unverified", path.display());
        return Ok(());
    }

    let data = fs::read(path).map_err(|e| TpmError::fs(path, e))?;
    let digest = Sha256::digest(&data);
    let computed = hex_encode(&digest);

    if !computed.eq_ignore_ascii_case(hex) {
        let _ = fs::remove_file(path);
        return Err(TpmError::Integrity(format!("checksum mismatch: expected {hex}, got {computed}")));
    }
    log_debug!("[resolver] checksum verified for {}", path.display());
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
