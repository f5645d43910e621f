//! The version header that opens every top-level stream.

use std::fmt;

use crate::bytes::{Cursor, Shortfall};

/// Feature id every stream must declare.
pub const FEATURE_ID: &str = "MSBAML";

/// A `major.minor` format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "facet", derive(facet::Facet))]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    /// The version this crate reads and writes.
    pub const CURRENT: Version = Version {
        major: 0,
        minor: 96,
    };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHeader {
    pub feature_id: String,
    pub reader: Version,
    pub updater: Version,
    pub writer: Version,
}

impl Default for VersionHeader {
    fn default() -> Self {
        Self {
            feature_id: FEATURE_ID.to_owned(),
            reader: Version::CURRENT,
            updater: Version::CURRENT,
            writer: Version::CURRENT,
        }
    }
}

impl VersionHeader {
    /// Parse the header off the front of `cursor`. Version checks are left
    /// to the caller.
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<Self, Shortfall> {
        let len = cursor.i32()?;
        if !(0..=512).contains(&len) || len % 2 != 0 {
            return Err(Shortfall::Invalid(format!(
                "feature id length {len} is not a plausible UTF-16 length"
            )));
        }
        let raw = cursor.take(len as usize)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let feature_id = String::from_utf16(&units)
            .map_err(|_| Shortfall::Invalid("feature id is not UTF-16".into()))?;
        if feature_id != FEATURE_ID {
            return Err(Shortfall::Invalid(format!(
                "feature id {feature_id:?}, expected {FEATURE_ID:?}"
            )));
        }
        let mut version = || -> Result<Version, Shortfall> {
            let minor = cursor.u16()?;
            let major = cursor.u16()?;
            Ok(Version { major, minor })
        };
        let reader = version()?;
        let updater = version()?;
        let writer = version()?;
        Ok(Self {
            feature_id,
            reader,
            updater,
            writer,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        let units: Vec<u16> = self.feature_id.encode_utf16().collect();
        out.extend_from_slice(&((units.len() * 2) as i32).to_le_bytes());
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        for version in [self.reader, self.updater, self.writer] {
            out.extend_from_slice(&version.minor.to_le_bytes());
            out.extend_from_slice(&version.major.to_le_bytes());
        }
    }

    /// Whether a reader at [`Version::CURRENT`] can read this stream.
    /// Minor differences are accepted.
    pub fn is_readable(&self) -> bool {
        self.reader.major <= Version::CURRENT.major
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_header_round_trip() {
        let header = VersionHeader {
            writer: Version::new(0, 94),
            ..VersionHeader::default()
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        assert_eq!(out.len(), 4 + 12 + 12);
        let mut cursor = Cursor::new(&out);
        assert_eq!(VersionHeader::parse(&mut cursor), Ok(header));
    }

    #[test]
    fn test_wrong_feature_id() {
        let header = VersionHeader {
            feature_id: "NOTBAML".into(),
            ..VersionHeader::default()
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        let mut cursor = Cursor::new(&out);
        assert!(matches!(
            VersionHeader::parse(&mut cursor),
            Err(Shortfall::Invalid(_))
        ));
    }

    #[test]
    fn test_minor_difference_is_readable() {
        let header = VersionHeader {
            reader: Version::new(0, 120),
            ..VersionHeader::default()
        };
        assert!(header.is_readable());
        let header = VersionHeader {
            reader: Version::new(1, 0),
            ..VersionHeader::default()
        };
        assert!(!header.is_readable());
    }
}
