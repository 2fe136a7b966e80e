use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DEFINE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#define\s+(HALLEY_VERSION_MAJOR|HALLEY_VERSION_MINOR|HALLEY_VERSION_REVISION)\b(.*)$")
        .expect("regex define")
});

/// Engine version as `major.minor.revision`.
///
/// Parsing never fails: anything that is not a well formed version becomes
/// `0.0.0`, which orders before every real version and therefore reads as
/// "unknown / not built".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HalleyVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl HalleyVersion {
    pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    pub fn parse(value: &str) -> Self {
        Self::try_parse(value).unwrap_or_default()
    }

    fn try_parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('.');
        let major = parts.next()?.trim().parse::<u32>().ok()?;
        let minor = parts.next()?.trim().parse::<u32>().ok()?;
        let revision = parts.next()?.trim().parse::<u32>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, revision))
    }

    /// Reads the `HALLEY_VERSION_*` defines out of a version header. Missing
    /// defines leave their component at zero.
    pub fn parse_header<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut version = Self::default();
        for line in lines {
            let Some(captures) = DEFINE_LINE.captures(line.as_ref()) else {
                continue;
            };
            let value = captures
                .get(2)
                .map(|rest| rest.as_str())
                .unwrap_or_default()
                .split_whitespace()
                .find_map(|token| token.parse::<u32>().ok())
                .unwrap_or_default();

            match captures.get(1).map(|name| name.as_str()) {
                Some("HALLEY_VERSION_MAJOR") => version.major = value,
                Some("HALLEY_VERSION_MINOR") => version.minor = value,
                Some("HALLEY_VERSION_REVISION") => version.revision = value,
                _ => {}
            }
        }
        version
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for HalleyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

impl From<&str> for HalleyVersion {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::HalleyVersion;

    #[test]
    fn parses_three_part_versions() {
        assert_eq!(HalleyVersion::parse("1.2.3"), HalleyVersion::new(1, 2, 3));
        assert_eq!(HalleyVersion::parse(" 10.0.7\n"), HalleyVersion::new(10, 0, 7));
    }

    #[test]
    fn malformed_versions_become_zero() {
        for raw in ["", "1.2", "1.2.3.4", "a.b.c", "1.-2.3", "latest"] {
            assert_eq!(HalleyVersion::parse(raw), HalleyVersion::default(), "{raw}");
        }
        assert!(HalleyVersion::parse("nope").is_unknown());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = HalleyVersion::new(0, 9, 99);
        let b = HalleyVersion::new(1, 0, 0);
        let c = HalleyVersion::new(1, 0, 1);
        assert!(a < b && b < c && a < c);
        assert!(HalleyVersion::default() < a);
        assert_eq!(HalleyVersion::parse("1.0.1"), c);
    }

    #[test]
    fn reads_version_header_defines() {
        let header = [
            "#pragma once",
            "",
            "#define HALLEY_VERSION_MAJOR 0",
            "#define HALLEY_VERSION_MINOR 14",
            "#define  HALLEY_VERSION_REVISION   2 // patch",
            "#define HALLEY_VERSION_MAJOR_STRING \"9\"",
        ];
        assert_eq!(
            HalleyVersion::parse_header(header),
            HalleyVersion::new(0, 14, 2)
        );
    }

    #[test]
    fn header_without_defines_is_zero() {
        assert!(HalleyVersion::parse_header(["int x = 3;"]).is_unknown());
    }

    #[test]
    fn displays_dotted() {
        assert_eq!(HalleyVersion::new(2, 0, 11).to_string(), "2.0.11");
    }
}
