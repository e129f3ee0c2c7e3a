//! TDS protocol version identifiers.

use core::fmt;

/// TDS protocol version requested for a connection target.
///
/// The version picks which session implementation a pool creates; it is
/// resolved once per target, never per statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x72090002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x74000004);

    /// TDS 8.0 (SQL Server 2022+ strict encryption mode)
    pub const V8_0: Self = Self(0x08000000);

    /// Get the raw wire value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this is TDS 8.0.
    ///
    /// TDS 8.0 is encoded below every 7.x value on the wire.
    #[must_use]
    pub const fn is_tds_8(self) -> bool {
        self.0 == Self::V8_0.0
    }

    /// Parse a version such as `7.3`, `7.3B`, `7.4` or `8.0`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "7.2" => Some(Self::V7_2),
            "7.3" | "7.3a" => Some(Self::V7_3A),
            "7.3b" => Some(Self::V7_3B),
            "7.4" => Some(Self::V7_4),
            "8.0" | "8" => Some(Self::V8_0),
            _ => None,
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x72090002 => f.write_str("TDS 7.2"),
            0x730A0003 => f.write_str("TDS 7.3A"),
            0x730B0003 => f.write_str("TDS 7.3B"),
            0x74000004 => f.write_str("TDS 7.4"),
            0x08000000 => f.write_str("TDS 8.0"),
            raw => write!(f, "TDS 0x{raw:08X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_suffixes() {
        assert_eq!(TdsVersion::parse("7.3"), Some(TdsVersion::V7_3A));
        assert_eq!(TdsVersion::parse(" 7.3B "), Some(TdsVersion::V7_3B));
        assert_eq!(TdsVersion::parse("8"), Some(TdsVersion::V8_0));
        assert_eq!(TdsVersion::parse("9.1"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::V8_0.to_string(), "TDS 8.0");
        assert_eq!(TdsVersion::default(), TdsVersion::V7_4);
        assert!(TdsVersion::V8_0.is_tds_8());
    }
}
