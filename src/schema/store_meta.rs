// The per-version `manifest.json` written inside every store entry
// (spec.md §3 StoreEntry, §6 "Store metadata JSON"). Kept separate from the
// text manifest (`InstalledTool`) since this one is purely a diagnostic
// record of what was extracted, not a CRUD-managed entity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub tool: String,
    pub version: String,
    pub architecture: String,
    pub installed_at: String,
    pub store_path: String,
    pub binary: String,
    pub binary_path: String,
    /// Comma-joined relative path list, per spec.md §6.
    pub files: String,
}
