// Asset scoring (spec.md §4.5 "Asset scoring"): given the detected host
// architecture, score every release asset's (lowercased) filename and
// pick the best match.
//
// Kept as a flat table of signal → delta pairs rather than nested
// conditionals, per the spec's own design note (§9) that heuristic
// scoring "should be data, not code" — mirrors the same choice made for
// binary identification in `store::binary`. The teacher's
// `asset_matches_platform` (`libs/utilities/platform.rs`) is a boolean
// yes/no match on arch+os tokens; this generalizes it into a score so a
// close-but-imperfect match still wins over no match at all.

use crate::config::Arch;
use crate::schema::Asset;

const SCORE_ARCH_MATCH: i64 = 50;
const SCORE_LINUX: i64 = 30;
const SCORE_GNU: i64 = 5;
const SCORE_MUSL: i64 = -10;
const SCORE_DARWIN: i64 = -100;
const SCORE_WINDOWS: i64 = -100;
const SCORE_BSD: i64 = -50;
const SCORE_SOURCE: i64 = -200;
const SCORE_DEBUG: i64 = -150;
const SCORE_STATIC: i64 = 10;
const SCORE_MINIMAL: i64 = 5;
const SCORE_TAR_GZ: i64 = 20;
const SCORE_TAR_XZ_BZ2: i64 = 15;
const SCORE_ZIP: i64 = 10;

const BSD_NAMES: &[&str] = &["freebsd", "openbsd", "netbsd", "dragonfly", "bsd"];

fn arch_matches(name: &str, arch: Arch) -> bool {
    match arch {
        Arch::Arm64 => name.contains("arm64") || name.contains("aarch64"),
        Arch::Arm => name.contains("arm") && !name.contains("arm64") && !name.contains("aarch64"),
        Arch::I686 => {
            (name.contains("386") || name.contains("i686") || name.contains("x86"))
                && !name.contains("x86_64")
                && !name.contains("x86-64")
        }
        Arch::X86_64 => name.contains("x86_64") || name.contains("amd64") || name.contains("x86-64"),
    }
}

/// Scores a single (already-lowercased) asset filename against the host
/// architecture, per spec.md §4.5's table.
pub fn score_asset_name(name: &str, arch: Arch) -> i64 {
    let mut total = 0i64;

    if arch_matches(name, arch) {
        total += SCORE_ARCH_MATCH;
    }
    if name.contains("linux") {
        total += SCORE_LINUX;
    }
    if name.contains("gnu") {
        total += SCORE_GNU;
    }
    if name.contains("musl") {
        total += SCORE_MUSL;
    }
    if name.contains("darwin") || name.contains("macos") {
        total += SCORE_DARWIN;
    }
    if name.contains("windows") || name.contains("win") {
        total += SCORE_WINDOWS;
    }
    if BSD_NAMES.iter().any(|bsd| name.contains(bsd)) {
        total += SCORE_BSD;
    }
    if name.contains("source") || name.contains("src") {
        total += SCORE_SOURCE;
    }
    if name.contains("debug") || name.contains("dbg") {
        total += SCORE_DEBUG;
    }
    if name.contains("static") {
        total += SCORE_STATIC;
    }
    if name.contains("minimal") || name.contains("standalone") {
        total += SCORE_MINIMAL;
    }
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        total += SCORE_TAR_GZ;
    } else if name.ends_with(".tar.xz") || name.ends_with(".tar.bz2") {
        total += SCORE_TAR_XZ_BZ2;
    } else if name.ends_with(".zip") {
        total += SCORE_ZIP;
    }

    total
}

pub struct Scored<'a> {
    pub asset: &'a Asset,
    pub score: i64,
}

/// Picks the highest-scoring asset. Returns `None` only when `assets` is
/// empty; a negative top score is still returned (the caller is expected
/// to warn, per spec.md §4.5: "If the top score is negative, proceed but
/// warn").
pub fn pick_best_asset(assets: &[Asset], arch: Arch) -> Option<Scored<'_>> {
    assets
        .iter()
        .map(|asset| Scored { asset, score: score_asset_name(&asset.name.to_lowercase(), arch) })
        .fold(None, |best, candidate| match best {
            Some(ref b) if b.score >= candidate.score => best,
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> Asset {
        Asset { name: name.to_string(), browser_download_url: format!("https://example.invalid/{name}"), size: 1024 }
    }

    #[test]
    fn arch_match_prefers_exact_token() {
        assert!(score_asset_name("tool-linux-arm64.tar.gz", Arch::Arm64) > score_asset_name("tool-linux-amd64.tar.gz", Arch::Arm64));
    }

    #[test]
    fn arm_excludes_arm64_tokens() {
        assert!(arch_matches("tool-linux-arm-musl", Arch::Arm));
        assert!(!arch_matches("tool-linux-arm64", Arch::Arm));
    }

    #[test]
    fn darwin_and_windows_heavily_penalized() {
        assert!(score_asset_name("tool-darwin-arm64.tar.gz", Arch::Arm64) < 0);
        assert!(score_asset_name("tool-windows-amd64.zip", Arch::X86_64) < 0);
    }

    #[test]
    fn source_and_debug_assets_penalized_below_everything_else() {
        let source_score = score_asset_name("tool-source.tar.gz", Arch::X86_64);
        let normal_score = score_asset_name("tool-linux-amd64.tar.gz", Arch::X86_64);
        assert!(source_score < normal_score);
    }

    #[test]
    fn picks_highest_scoring_asset_of_the_set() {
        let assets = vec![
            asset("tool-darwin-arm64.tar.gz"),
            asset("tool-linux-arm64.tar.gz"),
            asset("tool-windows-arm64.zip"),
        ];
        let picked = pick_best_asset(&assets, Arch::Arm64).unwrap();
        assert_eq!(picked.asset.name, "tool-linux-arm64.tar.gz");
    }

    #[test]
    fn resolver_fails_closed_when_only_wrong_platform_assets_exist() {
        let assets = vec![asset("tool-darwin-arm64.tar.gz"), asset("tool-windows-arm64.zip")];
        let picked = pick_best_asset(&assets, Arch::Arm64).unwrap();
        assert!(picked.score < 0, "top score among only darwin/windows assets should be negative");
    }
}
