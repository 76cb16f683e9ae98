// Archive extraction (spec.md §4.4 "Extract"). Dispatches on filename
// suffix and unpacks into a fresh directory, then flattens a lone
// top-level wrapper directory if one exists — release archives routinely
// wrap everything in a single top-level directory, but not always.
//
// Grounded in the teacher's `libs/utilities/compression.rs` (`extract_archive`)
// for the format dispatch and decoder wiring; extended with `.tar.xz`/`.txz`
// support (declared in the teacher's Cargo.toml via `xz2` but never wired
// up there) and the strip/no-strip flattening this spec calls for, which
// the teacher's version does not attempt.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::Archive;
use xz2::read::XzDecoder;
use zip::ZipArchive;

use crate::error::{Result, TpmError};
use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Zip,
    Binary,
}

/// Maps a filename suffix onto a format, per spec.md §6's accepted list.
/// Anything unrecognized is treated as a single-binary pass-through rather
/// than an error — an asset named e.g. `tool-linux-arm64` with no
/// extension is common and must still install.
pub fn detect_format(name: &str) -> ArchiveFormat {
    let lower = name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        ArchiveFormat::TarBz2
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        ArchiveFormat::TarXz
    } else if lower.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if lower.ends_with(".zip") {
        ArchiveFormat::Zip
    } else {
        ArchiveFormat::Binary
    }
}

/// Extracts `archive_path` (whose original filename is `name`, used only
/// for format detection) into a fresh subdirectory of `dest`, returning
/// the path to the extracted tree. Strips a lone top-level wrapper
/// directory when one is present.
pub fn extract_archive(archive_path: &Path, name: &str, dest: &Path) -> Result<PathBuf> {
    let format = detect_format(name);
    let extracted = dest.join("extracted");
    fs::create_dir_all(&extracted).map_err(|e| TpmError::fs(&extracted, e))?;

    log_debug!("[store] extracting {} as {:?} into {}", name, format, extracted.display());

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, &extracted)?,
        ArchiveFormat::TarGz => {
            let decoder = GzDecoder::new(File::open(archive_path).map_err(|e| TpmError::fs(archive_path, e))?);
            unpack_tar(decoder, &extracted)?;
        }
        ArchiveFormat::TarBz2 => {
            let decoder = BzDecoder::new(File::open(archive_path).map_err(|e| TpmError::fs(archive_path, e))?);
            unpack_tar(decoder, &extracted)?;
        }
        ArchiveFormat::TarXz => {
            let decoder = XzDecoder::new(File::open(archive_path).map_err(|e| TpmError::fs(archive_path, e))?);
            unpack_tar(decoder, &extracted)?;
        }
        ArchiveFormat::Tar => {
            let file = File::open(archive_path).map_err(|e| TpmError::fs(archive_path, e))?;
            unpack_tar(file, &extracted)?;
        }
        ArchiveFormat::Binary => {
            let file_name = archive_path.file_name().ok_or_else(|| {
                TpmError::Internal("archive path has no filename".to_string())
            })?;
            fs::copy(archive_path, extracted.join(file_name)).map_err(|e| TpmError::fs(&extracted, e))?;
        }
    }

    flatten_single_top_dir(&extracted)?;
    Ok(extracted)
}

fn unpack_tar<R: io::Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.unpack(dest).map_err(|e| {
        TpmError::Integrity(format!("failed to unpack tar archive: {e}"))
    })
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| TpmError::fs(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        TpmError::Integrity(format!("failed to read zip archive: {e}"))
    })?;
    archive.extract(dest).map_err(|e| {
        TpmError::Integrity(format!("failed to extract zip archive: {e}"))
    })
}

/// If `dir` contains exactly one entry and it is a directory, move its
/// contents up into `dir` and remove the now-empty wrapper. Zip has no
/// native "strip components" option so this emulates tar's `--strip
/// -components=1` uniformly across formats; if moving fails partway
/// (e.g. a name collision), the wrapper directory is left in place rather
/// than leaving a half-flattened tree — the spec's "retry without
/// stripping" behavior, realized as "don't strip if it doesn't cleanly
/// apply" rather than a second extraction pass.
fn flatten_single_top_dir(dir: &Path) -> Result<()> {
    let entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| TpmError::fs(dir, e))?
        .filter_map(std::result::Result::ok)
        .collect();

    if entries.len() != 1 {
        return Ok(());
    }
    let top = entries[0].path();
    if !top.is_dir() {
        return Ok(());
    }

    let inner: Vec<_> = match fs::read_dir(&top) {
        Ok(iter) => iter.filter_map(std::result::Result::ok).collect(),
        Err(e) => {
            log_warn!("[store] could not inspect top-level dir {} for flattening: {e}", top.display());
            return Ok(());
        }
    };

    for entry in &inner {
        let from = entry.path();
        let to = dir.join(entry.file_name());
        if to.exists() {
            log_warn!(
                "[store] name collision flattening {}: leaving wrapper directory in place",
                to.display()
            );
            return Ok(());
        }
        if fs::rename(&from, &to).is_err() {
            log_warn!("[store] failed to flatten {} into {}: leaving wrapper directory in place", from.display(), to.display());
            return Ok(());
        }
    }
    let _ = fs::remove_dir(&top);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_formats_from_suffix() {
        assert_eq!(detect_format("tool-linux-arm64.tar.gz"), ArchiveFormat::TarGz);
        assert_eq!(detect_format("tool.tgz"), ArchiveFormat::TarGz);
        assert_eq!(detect_format("tool.tar.bz2"), ArchiveFormat::TarBz2);
        assert_eq!(detect_format("tool.tbz2"), ArchiveFormat::TarBz2);
        assert_eq!(detect_format("tool.tar.xz"), ArchiveFormat::TarXz);
        assert_eq!(detect_format("tool.txz"), ArchiveFormat::TarXz);
        assert_eq!(detect_format("tool.tar"), ArchiveFormat::Tar);
        assert_eq!(detect_format("tool.zip"), ArchiveFormat::Zip);
        assert_eq!(detect_format("tool-linux-arm64"), ArchiveFormat::Binary);
    }

    #[test]
    fn flattens_single_top_level_directory() {
        let dir = tempdir().unwrap();
        let wrapper = dir.path().join("tool-1.0.0");
        fs::create_dir_all(wrapper.join("bin")).unwrap();
        fs::write(wrapper.join("bin").join("tool"), b"binary").unwrap();
        fs::write(wrapper.join("README.md"), b"readme").unwrap();

        flatten_single_top_dir(dir.path()).unwrap();

        assert!(dir.path().join("bin").join("tool").exists());
        assert!(dir.path().join("README.md").exists());
        assert!(!wrapper.exists());
    }

    #[test]
    fn leaves_tree_alone_when_multiple_top_level_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"a").unwrap();
        fs::write(dir.path().join("b"), b"b").unwrap();
        flatten_single_top_dir(dir.path()).unwrap();
        assert!(dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
    }

    #[test]
    fn leaves_wrapper_in_place_on_name_collision() {
        let dir = tempdir().unwrap();
        let wrapper = dir.path().join("tool-1.0.0");
        fs::create_dir_all(&wrapper).unwrap();
        fs::write(wrapper.join("bin"), b"inner").unwrap();
        fs::write(dir.path().join("bin"), b"outer").unwrap();

        flatten_single_top_dir(dir.path()).unwrap();

        assert!(wrapper.exists(), "wrapper directory should survive a collision");
        assert_eq!(fs::read_to_string(dir.path().join("bin")).unwrap(), "outer");
    }
}
