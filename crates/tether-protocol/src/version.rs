//! Dotted release versions exchanged during handshakes and upgrades.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `major.minor.patch` release number.
///
/// Parsing is lenient about presentation: a leading `v` is stripped, any
/// pre-release or build suffix after `-` or `+` is ignored, and missing
/// components default to zero. Ordering is numeric per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Incompatible changes.
    pub major: u64,
    /// Backwards-compatible additions.
    pub minor: u64,
    /// Fixes.
    pub patch: u64,
}

/// Raised when a version string has no usable numeric core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}'")]
pub struct VersionParseError {
    input: String,
}

impl VersionParseError {
    /// Returns the rejected input.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl Version {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Reports whether `self` is at least `minimum`.
    #[must_use]
    pub fn satisfies_minimum(&self, minimum: &Self) -> bool {
        self >= minimum
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let error = || VersionParseError {
            input: input.to_owned(),
        };
        let trimmed = input.trim();
        let unprefixed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = unprefixed
            .split(['-', '+'])
            .next()
            .filter(|core| !core.is_empty())
            .ok_or_else(error)?;

        let mut parts = core.split('.');
        let mut component = || -> Result<u64, VersionParseError> {
            parts
                .next()
                .map_or(Ok(0), |part| part.parse::<u64>().map_err(|_| error()))
        };
        let version = Self::new(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(error());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.3", Version::new(1, 2, 3))]
    #[case("v0.4.1", Version::new(0, 4, 1))]
    #[case("2.0", Version::new(2, 0, 0))]
    #[case("3", Version::new(3, 0, 0))]
    #[case("1.0.0-beta.2", Version::new(1, 0, 0))]
    #[case("1.0.0+build.7", Version::new(1, 0, 0))]
    fn parses_release_strings(#[case] input: &str, #[case] expected: Version) {
        assert_eq!(input.parse::<Version>().expect("valid version"), expected);
    }

    #[rstest]
    #[case("")]
    #[case("v")]
    #[case("one.two")]
    #[case("1.2.3.4")]
    #[case("1..3")]
    fn rejects_garbage(#[case] input: &str) {
        let error = input.parse::<Version>().expect_err("invalid version");
        assert_eq!(error.input(), input);
    }

    #[test]
    fn ordering_is_numeric() {
        let older: Version = "0.9.12".parse().expect("valid");
        let newer: Version = "0.10.0".parse().expect("valid");
        assert!(newer > older);
        assert!(newer.satisfies_minimum(&older));
        assert!(!older.satisfies_minimum(&newer));
    }
}
