//! Semantic version comparison for release tags.
//!
//! Both sides are normalized by stripping a leading 'v'/'V' and parsed as
//! `major.minor.patch[-prerelease]`. When either side fails to parse, the
//! comparison degrades to plain string inequality: tags that differ are
//! reported as an update with no directional guarantee and no diff class.
//! That degraded mode is deliberate, not a bug to fix here - it preserves
//! the behavior callers already rely on for non-semver tags.

use std::cmp::Ordering;

/// Magnitude of an available update, for user-facing messaging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDiff {
    Major,
    Minor,
    Patch,
}

impl VersionDiff {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        }
    }
}

/// Result of comparing the installed version against a release tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    /// The release should be installed.
    pub has_update: bool,
    /// Set only when both versions parsed and the bump is a numeric one.
    pub diff: Option<VersionDiff>,
}

/// Strip a leading 'v' or 'V' and surrounding whitespace.
pub fn clean(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

#[derive(Debug, PartialEq, Eq)]
struct Parsed {
    major: u32,
    minor: u32,
    patch: u32,
    /// None for a release; Some for a pre-release, which ranks below it.
    pre: Option<String>,
}

impl PartialOrd for Parsed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Parsed {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

fn parse(version: &str) -> Option<Parsed> {
    let (numbers, pre) = match version.split_once('-') {
        Some((n, p)) => (n, Some(p.to_string())),
        None => (version, None),
    };

    let mut parts = numbers.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }

    Some(Parsed {
        major,
        minor,
        patch,
        pre,
    })
}

/// Compare the installed version against a candidate release tag.
pub fn compare(current: &str, candidate: &str) -> Comparison {
    let current_clean = clean(current);
    let candidate_clean = clean(candidate);

    match (parse(current_clean), parse(candidate_clean)) {
        (Some(cur), Some(new)) => {
            if new > cur {
                let diff = if new.major > cur.major {
                    Some(VersionDiff::Major)
                } else if new.minor > cur.minor {
                    Some(VersionDiff::Minor)
                } else if new.patch > cur.patch {
                    Some(VersionDiff::Patch)
                } else {
                    // Pre-release to release bump of the same triple.
                    None
                };
                Comparison {
                    has_update: true,
                    diff,
                }
            } else {
                Comparison {
                    has_update: false,
                    diff: None,
                }
            }
        }
        // Degraded mode for non-semver tags.
        _ => Comparison {
            has_update: current_clean != candidate_clean,
            diff: None,
        },
    }
}
