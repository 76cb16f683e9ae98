// C1 — Config & Arch. Resolves the handful of paths and settings every
// other component needs, once, at startup, and exposes them as an
// immutable `Config` value threaded explicitly through the orchestrator
// (spec.md §9's "Global mutable state" design note: no process-global
// singletons here, unlike the teacher's `DEBUG_ENABLED` — that one stays a
// flag because it really is process-wide logging state, everything else
// becomes a constructed value).
//
// Grounded in the teacher's `libs/paths.rs` (`resolve_paths`) and
// `libs/utilities/platform.rs` (`normalize_arch`/alias tables), adapted to
// this spec's closed arch set and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TpmError};

pub const DEFAULT_PREFIX: &str = "/data/data/com.termux/files/usr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm64,
    Arm,
    I686,
    X86_64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Maps a free-form architecture hint (an env var value or a kernel
    /// `machine` string) onto the closed arch set, per spec.md §4.1.
    pub fn normalize(raw: &str) -> Result<Arch> {
        match raw.to_lowercase().as_str() {
            "aarch64" | "arm64" => Ok(Arch::Arm64),
            "armv7l" | "arm" | "armhf" | "armv8" => Ok(Arch::Arm),
            "i686" | "x86" | "i386" => Ok(Arch::I686),
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            other => Err(TpmError::Unsupported { what: "arch", value: other.to_string() }),
        }
    }

    /// First consults `TERMUX_ARCH`, then falls back to the Rust target's
    /// `std::env::consts::ARCH`, which stands in here for a kernel `uname
    /// -m` probe (the same substitution the teacher's `detect_architecture`
    /// makes by using `std::env::consts::ARCH` directly).
    pub fn detect() -> Result<Arch> {
        if let Ok(hint) = env::var("TERMUX_ARCH") {
            if !hint.trim().is_empty() {
                return Arch::normalize(hint.trim());
            }
        }
        Arch::normalize(env::consts::ARCH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPolicy {
    Auto,
    Always,
    Never,
}

impl ColorPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorPolicy::Auto => "auto",
            ColorPolicy::Always => "always",
            ColorPolicy::Never => "never",
        }
    }

    fn from_env() -> ColorPolicy {
        match env::var("TPM_COLOR").ok().as_deref() {
            Some("always") => ColorPolicy::Always,
            Some("never") => ColorPolicy::Never,
            _ => ColorPolicy::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub bin_dir: PathBuf,
    pub lib_dir: PathBuf,
    pub store_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub manifest_file: PathBuf,
    pub network_timeout: Duration,
    pub max_retries: u32,
    pub color: ColorPolicy,
    pub arch: Arch,
}

impl Config {
    /// Resolves every path and setting from the environment, applying the
    /// defaults spec.md §6 documents. `$HOME` is required — without it
    /// there is nowhere to put the manifest — but `$PREFIX` defaults to the
    /// stock Termux prefix so the tool works unconfigured on a fresh
    /// install.
    pub fn resolve() -> Result<Config> {
        let home = env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| TpmError::Usage("$HOME is not set".to_string()))?;

        let prefix = env::var("PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREFIX));

        let bin_dir = prefix.join("bin");
        let lib_dir = prefix.join("lib").join("tpm");
        let store_root = prefix.join("tpm").join("store");
        let tmp_dir = prefix.join("tpm").join("tmp");
        let manifest_file = home.join(".tpm").join("manifest");

        let arch = Arch::detect()?;

        Ok(Config {
            prefix,
            bin_dir,
            lib_dir,
            store_root,
            tmp_dir,
            manifest_file,
            network_timeout: Duration::from_secs(10),
            max_retries: 2,
            color: ColorPolicy::from_env(),
            arch,
        })
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.tmp_dir.join("locks")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.tmp_dir.join("backup")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_arch_aliases() {
        assert_eq!(Arch::normalize("aarch64").unwrap(), Arch::Arm64);
        assert_eq!(Arch::normalize("arm64").unwrap(), Arch::Arm64);
        assert_eq!(Arch::normalize("armv7l").unwrap(), Arch::Arm);
        assert_eq!(Arch::normalize("armhf").unwrap(), Arch::Arm);
        assert_eq!(Arch::normalize("armv8").unwrap(), Arch::Arm);
        assert_eq!(Arch::normalize("i386").unwrap(), Arch::I686);
        assert_eq!(Arch::normalize("x86").unwrap(), Arch::I686);
        assert_eq!(Arch::normalize("amd64").unwrap(), Arch::X86_64);
        assert_eq!(Arch::normalize("X86_64").unwrap(), Arch::X86_64);
    }

    #[test]
    fn rejects_unknown_arch() {
        assert!(Arch::normalize("riscv64").is_err());
    }
}
