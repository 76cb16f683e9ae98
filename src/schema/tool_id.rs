// The `owner/repo` primary key used across the manifest, the store layout,
// and the release resolver.

use crate::error::{Result, TpmError};
use std::fmt;
use std::str::FromStr;

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolId {
    pub owner: String,
    pub repo: String,
}

impl ToolId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let repo = repo.into();
        if !is_valid_segment(&owner) || !is_valid_segment(&repo) {
            return Err(TpmError::Usage(format!(
                "invalid tool id '{owner}/{repo}': expected owner/repo matching [A-Za-z0-9_.-]+"
            )));
        }
        Ok(ToolId { owner, repo })
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for ToolId {
    type Err = TpmError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        let owner = parts.next().unwrap_or("");
        let repo = parts.next().unwrap_or("");
        if parts.next().is_some() {
            return Err(TpmError::Usage(format!(
                "invalid tool id '{s}': expected exactly one '/' separating owner and repo"
            )));
        }
        ToolId::new(owner, repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_ids() {
        let id: ToolId = "example/hello".parse().unwrap();
        assert_eq!(id.owner, "example");
        assert_eq!(id.repo, "hello");
        assert_eq!(id.to_string(), "example/hello");
    }

    #[test]
    fn rejects_missing_slash() {
        assert!("example".parse::<ToolId>().is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!("ex ample/hello".parse::<ToolId>().is_err());
        assert!("example/he llo".parse::<ToolId>().is_err());
    }

    #[test]
    fn rejects_extra_slashes() {
        assert!("a/b/c".parse::<ToolId>().is_err());
    }

    #[test]
    fn accepts_dots_dashes_underscores() {
        assert!("BurntSushi/ripgrep".parse::<ToolId>().is_ok());
        assert!("foo.bar/baz-qux_1".parse::<ToolId>().is_ok());
    }
}
