//! This module defines the canonical, type-safe representation of the
//! warehouse's transport types.
//!
//! Transport types are the server's abstract type tags, not host-language
//! types. They arrive as case-insensitive textual tokens in schema
//! descriptors and are mapped to host-type behavior by the binder and the
//! decoders.

use crate::error::HailstoneError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The warehouse's abstract type tag for a column or structured-type field.
///
/// This enum replaces string-based type dispatch, enabling compile-time
/// checks and eliminating an entire class of runtime errors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Fixed,
    Real,
    Text,
    Boolean,
    Binary,
    Date,
    Time,
    TimestampNtz,
    TimestampLtz,
    TimestampTz,
    Object,
    Array,
    Map,
    Variant,
    Null,
    Unsupported,
}

impl TransportType {
    /// Returns `true` for the three timestamp flavors.
    pub fn is_timestamp(&self) -> bool {
        matches!(
            self,
            Self::TimestampNtz | Self::TimestampLtz | Self::TimestampTz
        )
    }

    /// Returns `true` for any of the date/time family, timestamps included.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Time) || self.is_timestamp()
    }

    /// Returns `true` for the schema-bearing nested types.
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Object | Self::Array | Self::Map)
    }

    /// The lowercase wire token, as used in schema descriptors.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::Time => "time",
            Self::TimestampNtz => "timestamp_ntz",
            Self::TimestampLtz => "timestamp_ltz",
            Self::TimestampTz => "timestamp_tz",
            Self::Object => "object",
            Self::Array => "array",
            Self::Map => "map",
            Self::Variant => "variant",
            Self::Null => "null",
            Self::Unsupported => "unsupported",
        }
    }
}

impl FromStr for TransportType {
    type Err = HailstoneError;

    /// Parses a case-insensitive schema-descriptor token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "real" => Ok(Self::Real),
            "text" => Ok(Self::Text),
            "boolean" => Ok(Self::Boolean),
            "binary" => Ok(Self::Binary),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "timestamp_ntz" => Ok(Self::TimestampNtz),
            "timestamp_ltz" => Ok(Self::TimestampLtz),
            "timestamp_tz" => Ok(Self::TimestampTz),
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            "map" => Ok(Self::Map),
            "variant" => Ok(Self::Variant),
            "null" => Ok(Self::Null),
            token => Err(HailstoneError::UnsupportedType(format!(
                "unknown transport type token '{}'",
                token
            ))),
        }
    }
}

/// Provides the canonical string representation for a `TransportType`.
impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // These tokens are part of the public contract.
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parse_is_case_insensitive() {
        assert_eq!(
            TransportType::from_str("TIMESTAMP_LTZ").unwrap(),
            TransportType::TimestampLtz
        );
        assert_eq!(
            TransportType::from_str("fixed").unwrap(),
            TransportType::Fixed
        );
    }

    #[test]
    fn test_display_round_trips_every_token() {
        let all = [
            TransportType::Fixed,
            TransportType::Real,
            TransportType::Text,
            TransportType::Boolean,
            TransportType::Binary,
            TransportType::Date,
            TransportType::Time,
            TransportType::TimestampNtz,
            TransportType::TimestampLtz,
            TransportType::TimestampTz,
            TransportType::Object,
            TransportType::Array,
            TransportType::Map,
            TransportType::Variant,
            TransportType::Null,
        ];
        for t in all {
            assert_eq!(TransportType::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_token_is_unsupported_error() {
        let err = TransportType::from_str("geometry").unwrap_err();
        assert!(matches!(err, HailstoneError::UnsupportedType(_)));
    }

    #[test]
    fn test_serde_uses_snake_case_tokens() {
        let json = serde_json::to_string(&TransportType::TimestampTz).unwrap();
        assert_eq!(json, "\"timestamp_tz\"");
        let back: TransportType = serde_json::from_str("\"map\"").unwrap();
        assert_eq!(back, TransportType::Map);
    }
}
