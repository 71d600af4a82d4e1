use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Semantic version used by module descriptors and capability bindings
///
/// Missing components parse as zero, so `"1"`, `"1.0"` and `"1.0.0"` are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version '{0}'")]
pub struct VersionParseError(pub String);

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Pre-release and build metadata are ignored for ordering
        let core = trimmed
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(VersionParseError(s.to_string()));
        }

        let mut parts = [0u32; 3];
        for (idx, part) in core.split('.').enumerate() {
            if idx >= parts.len() {
                return Err(VersionParseError(s.to_string()));
            }
            parts[idx] = part
                .parse()
                .map_err(|_| VersionParseError(s.to_string()))?;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_forms() {
        assert_eq!("1".parse::<Version>().unwrap(), Version::new(1, 0, 0));
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0));
        assert_eq!("1.2.3-beta".parse::<Version>().unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn test_invalid() {
        assert!("".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
        assert!(Version::new(2, 0, 0) > Version::new(1, 99, 0));
    }
}
