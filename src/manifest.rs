// C3 — Manifest: the text-file record of installed tools (spec.md §3/§4.3).
// Grounded in the teacher's `libs/state_management.rs` for the overall
// load-or-initialize / dirty-save shape, but the on-disk format here is the
// spec's `---`-delimited `key=value` block format rather than JSON — the
// spec calls for something a user can read and hand-edit, and survive a
// crash mid-write, which a line-oriented format with an atomic rename gives
// for free.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::fsutil::{self, symlink_resolves_to};
use crate::schema::{InstalledTool, ToolId, Version, FIELD_ORDER};
use crate::{log_debug, log_warn};

const HEADER: &str = "# tpm manifest — do not edit while tpm is running\n";

pub enum AddError {
    AlreadyExists,
    MissingField(&'static str),
}

pub enum UpdateError {
    NotFound,
    IdChange,
}

/// One field left unset in a patch means "leave as-is" — `tool` may never
/// change (an update that needs a different ToolId is a remove+add).
#[derive(Default)]
pub struct ManifestPatch {
    pub version: Option<Version>,
    pub binary: Option<String>,
    pub store_path: Option<String>,
    pub symlink_path: Option<String>,
    pub installed_at: Option<String>,
    pub checksum: Option<Option<String>>,
    pub files: Option<Vec<String>>,
}

pub struct Manifest {
    path: PathBuf,
    order: Vec<ToolId>,
    records: BTreeMap<ToolId, InstalledTool>,
    dirty: bool,
}

impl Manifest {
    /// `load` — reads the manifest file (if any), parsing `---`-delimited
    /// blocks of `key=value` lines. Blocks missing a `tool` key are a
    /// recoverable warning, not a failure.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Manifest> {
        let path = path.into();
        let mut manifest = Manifest { path: path.clone(), order: Vec::new(), records: BTreeMap::new(), dirty: false };

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(manifest),
            Err(e) => return Err(e),
        };

        for block in split_blocks(&contents) {
            match parse_block(&block) {
                Some((id, record)) => {
                    if !manifest.records.contains_key(&id) {
                        manifest.order.push(id.clone());
                    }
                    manifest.records.insert(id, record);
                }
                None => log_warn!("[manifest] skipping block with no 'tool' key"),
            }
        }
        Ok(manifest)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `save` — only writes if dirty. Takes a timestamped backup first,
    /// removed on success; writes with mode 0600.
    pub fn save(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let backup = self.path.with_extension(format!("bak.{}", Utc::now().format("%Y%m%dT%H%M%S%.f")));
        let had_prior = self.path.exists();
        if had_prior {
            fs::copy(&self.path, &backup)?;
        }

        let mut out = String::from(HEADER);
        for id in &self.order {
            if let Some(record) = self.records.get(id) {
                out.push_str("---\n");
                out.push_str(&record.to_block());
                out.push('\n');
            }
        }
        out.push_str("---\n");

        write_with_mode(&self.path, &out)?;

        if had_prior {
            let _ = fs::remove_file(&backup);
        }
        self.dirty = false;
        Ok(())
    }

    pub fn installed(&self, id: &ToolId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &ToolId) -> Option<&InstalledTool> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledTool> {
        self.order.iter().filter_map(move |id| self.records.get(id))
    }

    /// `add(record) -> ok | AlreadyExists | MissingRequiredField(name)`.
    /// `installed_at` defaults to now if absent (caller passes an empty
    /// string to request the default); `files` is left to the caller to
    /// populate from a store scan before calling `add`.
    pub fn add(&mut self, mut record: InstalledTool) -> Result<(), AddError> {
        if self.records.contains_key(&record.tool) {
            return Err(AddError::AlreadyExists);
        }
        if record.binary.is_empty() {
            return Err(AddError::MissingField("binary"));
        }
        if record.store_path.is_empty() {
            return Err(AddError::MissingField("store_path"));
        }
        if record.symlink_path.is_empty() {
            return Err(AddError::MissingField("symlink_path"));
        }
        if record.installed_at.is_empty() {
            record.installed_at = Utc::now().to_rfc3339();
        }
        self.order.push(record.tool.clone());
        self.records.insert(record.tool.clone(), record);
        self.dirty = true;
        Ok(())
    }

    /// `update(id, patch) -> ok | NotFound | IdChange`. `tool` cannot be
    /// changed through a patch; unspecified fields are preserved.
    pub fn update(&mut self, id: &ToolId, patch: ManifestPatch) -> Result<(), UpdateError> {
        let record = self.records.get_mut(id).ok_or(UpdateError::IdChange).map_err(|_| UpdateError::NotFound)?;
        if let Some(v) = patch.version {
            record.version = v;
        }
        if let Some(v) = patch.binary {
            record.binary = v;
        }
        if let Some(v) = patch.store_path {
            record.store_path = v;
        }
        if let Some(v) = patch.symlink_path {
            record.symlink_path = v;
        }
        if let Some(v) = patch.installed_at {
            record.installed_at = v;
        }
        if let Some(v) = patch.checksum {
            record.checksum = v;
        }
        if let Some(v) = patch.files {
            record.files = v;
        }
        self.dirty = true;
        Ok(())
    }

    /// `remove(id) -> ok | NotFound`.
    pub fn remove(&mut self, id: &ToolId) -> Result<InstalledTool, ()> {
        let record = self.records.remove(id).ok_or(())?;
        self.order.retain(|x| x != id);
        self.dirty = true;
        Ok(record)
    }

    /// `validate() -> errors[]`: every record has required fields,
    /// `store_path` exists, `symlink_path` is a symlink resolving to
    /// `store_path`.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for record in self.iter() {
            if record.binary.is_empty() || record.store_path.is_empty() || record.symlink_path.is_empty() {
                errors.push(format!("{}: missing a required field", record.tool));
                continue;
            }
            let store_path = Path::new(&record.store_path);
            if !store_path.exists() {
                errors.push(format!("{}: store_path {} does not exist", record.tool, record.store_path));
            } else if !fsutil::is_executable(store_path) {
                errors.push(format!("{}: store_path {} is not executable", record.tool, record.store_path));
            }
            let symlink_path = Path::new(&record.symlink_path);
            if !fsutil::is_symlink(symlink_path) {
                errors.push(format!("{}: symlink_path {} is not a symlink", record.tool, record.symlink_path));
            } else if !symlink_resolves_to(symlink_path, store_path) {
                errors.push(format!(
                    "{}: symlink_path {} does not resolve to store_path {}",
                    record.tool, record.symlink_path, record.store_path
                ));
            }
        }
        errors
    }

    /// `repair_symlinks() -> repaired_count`: for every record whose
    /// symlink is missing or pointing elsewhere, recreate it.
    pub fn repair_symlinks(&mut self) -> usize {
        let mut repaired = 0;
        for id in self.order.clone() {
            let Some(record) = self.records.get(&id) else { continue };
            let symlink_path = Path::new(&record.symlink_path);
            let store_path = Path::new(&record.store_path);
            let needs_repair = !fsutil::is_symlink(symlink_path) || !symlink_resolves_to(symlink_path, store_path);
            if !needs_repair {
                continue;
            }
            if fsutil::is_symlink(symlink_path) || symlink_path.exists() {
                let _ = fs::remove_file(symlink_path);
            }
            if let Some(parent) = symlink_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if fsutil::create_symlink(store_path, symlink_path).is_ok() {
                repaired += 1;
            } else {
                log_warn!("[manifest] failed to repair symlink for {}", record.tool);
            }
        }
        repaired
    }
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &str) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)
}

fn split_blocks(contents: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in contents.lines() {
        if line.trim_end() == "---" {
            if !current.trim().is_empty() {
                blocks.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_block(block: &str) -> Option<(ToolId, InstalledTool)> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else { continue };
        fields.insert(key.trim().to_string(), value.trim().to_string());
    }

    let tool_str = fields.remove("tool")?;
    let id: ToolId = tool_str.parse().ok()?;

    let version = Version::new(fields.remove("version").unwrap_or_default());
    let binary = fields.remove("binary").unwrap_or_default();
    let store_path = fields.remove("store_path").unwrap_or_default();
    let symlink_path = fields.remove("symlink_path").unwrap_or_default();
    let installed_at = fields.remove("installed_at").unwrap_or_default();
    let checksum = fields.remove("checksum").filter(|s| !s.is_empty());
    let files = fields
        .remove("files")
        .map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    // Anything left in `fields` is an unknown key, preserved for round-trip.
    let extras = fields;

    Some((
        id.clone(),
        InstalledTool { tool: id, version, binary, store_path, symlink_path, installed_at, checksum, files, extras },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str, version: &str) -> InstalledTool {
        InstalledTool {
            tool: id.parse().unwrap(),
            version: Version::new(version),
            binary: "hello".into(),
            store_path: "/store/hello".into(),
            symlink_path: "/bin/hello".into(),
            installed_at: "2026-01-01T00:00:00+00:00".into(),
            checksum: Some("sha256:abc".into()),
            files: vec!["/store/hello".into()],
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest");
        let mut m = Manifest::load(&path).unwrap();
        m.add(sample("example/hello", "v1.2.3")).unwrap();
        m.add(sample("example/world", "v2.0.0")).unwrap();
        m.save().unwrap();

        let reloaded = Manifest::load(&path).unwrap();
        assert!(reloaded.installed(&"example/hello".parse().unwrap()));
        assert!(reloaded.installed(&"example/world".parse().unwrap()));
        assert_eq!(reloaded.get(&"example/hello".parse().unwrap()).unwrap().version.as_str(), "v1.2.3");
        assert_eq!(reloaded.iter().count(), 2);
    }

    #[test]
    fn add_rejects_duplicate_tool_id() {
        let dir = tempdir().unwrap();
        let mut m = Manifest::load(dir.path().join("manifest")).unwrap();
        m.add(sample("example/hello", "v1.0.0")).unwrap();
        assert!(matches!(m.add(sample("example/hello", "v1.0.1")), Err(AddError::AlreadyExists)));
    }

    #[test]
    fn add_requires_required_fields() {
        let dir = tempdir().unwrap();
        let mut m = Manifest::load(dir.path().join("manifest")).unwrap();
        let mut bad = sample("example/hello", "v1.0.0");
        bad.binary.clear();
        assert!(matches!(m.add(bad), Err(AddError::MissingField("binary"))));
    }

    #[test]
    fn save_is_noop_when_not_dirty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest");
        let mut m = Manifest::load(&path).unwrap();
        m.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn blocks_missing_tool_key_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest");
        fs::write(&path, "---\nversion=v1.0.0\nbinary=oops\n---\ntool=example/hello\nversion=v1.0.0\nbinary=hello\nstore_path=/s\nsymlink_path=/b\n---\n").unwrap();
        let m = Manifest::load(&path).unwrap();
        assert_eq!(m.iter().count(), 1);
    }

    #[test]
    fn update_preserves_unspecified_fields() {
        let dir = tempdir().unwrap();
        let mut m = Manifest::load(dir.path().join("manifest")).unwrap();
        let id: ToolId = "example/hello".parse().unwrap();
        m.add(sample("example/hello", "v1.0.0")).unwrap();
        m.update(&id, ManifestPatch { version: Some(Version::new("v1.1.0")), ..Default::default() }).unwrap();
        let record = m.get(&id).unwrap();
        assert_eq!(record.version.as_str(), "v1.1.0");
        assert_eq!(record.binary, "hello");
    }

    #[test]
    fn validate_flags_non_executable_store_path() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("hello");
        fs::write(&store_path, b"x").unwrap();
        let symlink_path = dir.path().join("bin").join("hello");
        fs::create_dir_all(symlink_path.parent().unwrap()).unwrap();
        fsutil::create_symlink(&store_path, &symlink_path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&store_path, fs::Permissions::from_mode(0o644)).unwrap();
        }

        let mut m = Manifest::load(dir.path().join("manifest")).unwrap();
        let mut record = sample("example/hello", "v1.0.0");
        record.store_path = store_path.to_string_lossy().to_string();
        record.symlink_path = symlink_path.to_string_lossy().to_string();
        m.add(record).unwrap();

        let errors = m.validate();
        #[cfg(unix)]
        assert!(errors.iter().any(|e| e.contains("is not executable")));
        #[cfg(not(unix))]
        assert!(errors.is_empty());
    }

    #[test]
    fn remove_then_get_returns_not_found() {
        let dir = tempdir().unwrap();
        let mut m = Manifest::load(dir.path().join("manifest")).unwrap();
        let id: ToolId = "example/hello".parse().unwrap();
        m.add(sample("example/hello", "v1.0.0")).unwrap();
        assert!(m.remove(&id).is_ok());
        assert!(m.get(&id).is_none());
        assert!(m.remove(&id).is_err());
    }

    #[test]
    fn preserves_unknown_keys_across_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest");
        fs::write(
            &path,
            "---\ntool=example/hello\nversion=v1.0.0\nbinary=hello\nstore_path=/s\nsymlink_path=/b\nnotes=hand-edited\n---\n",
        )
        .unwrap();
        let mut m = Manifest::load(&path).unwrap();
        m.update(&"example/hello".parse().unwrap(), ManifestPatch { version: Some(Version::new("v1.0.1")), ..Default::default() }).unwrap();
        m.save().unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("notes=hand-edited"));
    }
}
