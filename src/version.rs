//! Module and host API versions.

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// A `major.minor.patch` version.
///
/// `#[repr(C)]` so it can be returned by value from the
/// `query_module_api_version` entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
    /// Patch version.
    pub patch: u16,
}

impl Version {
    /// Create a new version.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self { major, minor, patch }
    }

    /// Parse from a string like "1.2.0" or "1.2".
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::invalid_descriptor(format!("invalid version: {}", s)));
        }

        let component = |part: &str, name: &str| -> Result<u16> {
            part.parse()
                .map_err(|_| Error::invalid_descriptor(format!("invalid {} version: {}", name, s)))
        };

        let major = component(parts[0], "major")?;
        let minor = component(parts[1], "minor")?;
        let patch = match parts.get(2) {
            Some(p) => component(p, "patch")?,
            None => 0,
        };

        Ok(Self { major, minor, patch })
    }

    /// Check whether `self` satisfies `expected`.
    ///
    /// Holds iff the majors match and `self.minor >= expected.minor`. Patch
    /// is ignored. Not symmetric.
    pub const fn is_compatible_with(&self, expected: &Version) -> bool {
        self.major == expected.major && self.minor >= expected.minor
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
