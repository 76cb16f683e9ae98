// Small filesystem primitives shared by the transaction, manifest, and
// store layers: symlink creation/inspection and resolution-equality checks
// used throughout spec.md §3's invariants ("every symlink_path ... resolves
// to store_path").

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.file_type().is_symlink()).unwrap_or(false)
}

#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn create_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks require a unix target"))
}

/// True if `link` is a symlink whose target, resolved relative to its own
/// parent directory, equals `expected` (also resolved). Tolerates a target
/// that doesn't exist on disk (a broken symlink still "points at" a path).
pub fn symlink_resolves_to(link: &Path, expected: &Path) -> bool {
    let Ok(raw_target) = fs::read_link(link) else { return false };
    let resolved = if raw_target.is_absolute() {
        raw_target
    } else {
        match link.parent() {
            Some(parent) => parent.join(raw_target),
            None => raw_target,
        }
    };
    normalize(&resolved) == normalize(expected)
}

/// Lexical normalization (no symlink following, no filesystem access) so
/// this works for targets that don't exist yet in tests.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(unix)]
pub fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn symlink_resolves_to_matches_relative_and_absolute_targets() {
        let root = tempdir().unwrap();
        let target = root.path().join("real");
        std::fs::write(&target, b"x").unwrap();
        let link = root.path().join("link");
        create_symlink(&target, &link).unwrap();
        assert!(symlink_resolves_to(&link, &target));
        assert!(!symlink_resolves_to(&link, &root.path().join("other")));
    }
}
