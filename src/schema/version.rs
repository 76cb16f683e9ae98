// Opaque version tags as published by the release host, with a normalized
// comparison: leading `v` stripped, split on `.` then `-`, numeric segments
// compared numerically, non-numeric lexicographically, missing trailing
// segments imputed as `0`. Never parsed for semantics beyond comparison —
// upstream tags are not guaranteed to be semver.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl Version {
    pub fn new(raw: impl Into<String>) -> Self {
        Version(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sanitized form used as a store directory name: leading `v`
    /// stripped, `/` replaced with `_`.
    pub fn sanitized(&self) -> String {
        let stripped = self.0.strip_prefix('v').unwrap_or(&self.0);
        stripped.replace('/', "_")
    }

    fn segments(&self) -> Vec<String> {
        let stripped = self.0.strip_prefix('v').unwrap_or(&self.0);
        stripped
            .split(['.', '-'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn compare(&self, other: &Version) -> Ordering {
        let a = self.segments();
        let b = other.segments();
        let len = a.len().max(b.len());
        for i in 0..len {
            let sa = a.get(i).map(String::as_str).unwrap_or("0");
            let sb = b.get(i).map(String::as_str).unwrap_or("0");
            let ord = match (sa.parse::<u64>(), sb.parse::<u64>()) {
                (Ok(na), Ok(nb)) => na.cmp(&nb),
                _ => sa.cmp(sb),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_v() {
        assert_eq!(Version::new("v1.2.3").sanitized(), "1.2.3");
        assert_eq!(Version::new("1.2.3").sanitized(), "1.2.3");
    }

    #[test]
    fn numeric_segments_compare_numerically() {
        assert_eq!(Version::new("v1.9.0").compare(&Version::new("v1.10.0")), Ordering::Less);
        assert_eq!(Version::new("v2.0.0").compare(&Version::new("v1.99.99")), Ordering::Greater);
    }

    #[test]
    fn missing_trailing_segments_imputed_zero() {
        assert_eq!(Version::new("v1.2").compare(&Version::new("v1.2.0")), Ordering::Equal);
        assert_eq!(Version::new("v1.2.1").compare(&Version::new("v1.2")), Ordering::Greater);
    }

    #[test]
    fn non_numeric_segments_compare_lexicographically() {
        assert_eq!(
            Version::new("v1.2.0-alpha").compare(&Version::new("v1.2.0-beta")),
            Ordering::Less
        );
    }

    #[test]
    fn comparison_is_antisymmetric_and_transitive() {
        let samples = ["v1.0.0", "v1.0.1", "v1.1.0", "v2.0.0-rc1", "v2.0.0", "v0.9.9"];
        for a in &samples {
            for b in &samples {
                let va = Version::new(*a);
                let vb = Version::new(*b);
                assert_eq!(va.compare(&vb), vb.compare(&va).reverse());
            }
        }
        for a in &samples {
            for b in &samples {
                for c in &samples {
                    let (va, vb, vc) = (Version::new(*a), Version::new(*b), Version::new(*c));
                    if va.compare(&vb) != Ordering::Greater && vb.compare(&vc) != Ordering::Greater {
                        assert_ne!(va.compare(&vc), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn sanitized_replaces_slash() {
        assert_eq!(Version::new("release/1.0").sanitized(), "release_1.0");
    }
}
