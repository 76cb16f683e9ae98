// `InstalledTool`: one manifest record. Mirrors the teacher's `ToolState`
// (examples/kodelint-setup-devbox/src/schemas/state_file.rs) in spirit —
// a small, mostly-String, serialization-friendly struct describing one
// completed installation — but persisted in the text block format spec.md
// §3/§6 mandates instead of JSON, since the manifest here is meant to be
// human-editable and crash-tolerant line-by-line.

use std::collections::BTreeMap;

use crate::schema::{ToolId, Version};

/// Fixed output field order for manifest serialization (spec.md §4.3).
pub const FIELD_ORDER: &[&str] = &[
    "tool",
    "version",
    "binary",
    "store_path",
    "symlink_path",
    "installed_at",
    "checksum",
    "files",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub tool: ToolId,
    pub version: Version,
    pub binary: String,
    pub store_path: String,
    pub symlink_path: String,
    pub installed_at: String,
    pub checksum: Option<String>,
    pub files: Vec<String>,
    /// Unknown keys encountered on load, preserved verbatim on the next save.
    pub extras: BTreeMap<String, String>,
}

impl InstalledTool {
    /// Renders the record as a sequence of `key=value` lines, in
    /// `FIELD_ORDER`, omitting empty fields, followed by any preserved
    /// extras sorted by key (a `BTreeMap` carries no insertion order to
    /// preserve, but the key set and values round-trip exactly).
    pub fn to_block(&self) -> String {
        let mut lines = Vec::new();
        let values: [(&str, String); 8] = [
            ("tool", self.tool.to_string()),
            ("version", self.version.to_string()),
            ("binary", self.binary.clone()),
            ("store_path", self.store_path.clone()),
            ("symlink_path", self.symlink_path.clone()),
            ("installed_at", self.installed_at.clone()),
            ("checksum", self.checksum.clone().unwrap_or_default()),
            ("files", self.files.join(",")),
        ];
        for (key, value) in values {
            if !value.is_empty() {
                lines.push(format!("{key}={value}"));
            }
        }
        for (key, value) in &self.extras {
            if !value.is_empty() {
                lines.push(format!("{key}={value}"));
            }
        }
        lines.join("\n")
    }
}
