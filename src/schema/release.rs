// Models for the release host's read-only JSON API (spec.md §6: "Release
// host contract"). Field names follow the GitHub releases API, the
// concrete host the spec targets, mirroring how the teacher's
// `Release`/`Asset` structs in `src/schema.rs` map the same API.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// The release host's error-message shape, surfaced on non-2xx responses
/// so the API client can report the host's own message instead of a bare
/// status code (spec.md §4.5's API client contract).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}
