//! The single source of truth for all result-decoding configuration.
//!
//! This module defines the unified `DecodeOptions` struct, which is created
//! once at the driver boundary (from connection parameters and per-query
//! context options) and then passed down read-only through the decoders and
//! the record rewriter.

use serde::{Deserialize, Serialize};

//==================================================================================
// I. Core Option Enums
//==================================================================================

/// The unit timestamp columns are rewritten to when a record batch is handed
/// back to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampUnit {
    Second,
    Millisecond,
    Microsecond,
    /// Only safe for instants within roughly 1677-09-21 .. 2262-04-11;
    /// outside that range the rewriter fails per column.
    Nanosecond,
    /// **Default:** keep whatever physical layout the server shipped.
    #[default]
    Original,
}

/// Policy for string columns whose bytes may not be valid UTF-8.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Utf8Policy {
    /// **Default:** trust the server; pass bytes through untouched.
    #[default]
    Off,
    /// Re-validate each value and substitute U+FFFD for invalid sequences.
    Replace,
}

//==================================================================================
// II. The Unified DecodeOptions
//==================================================================================

/// Context options consumed by the textual decoder, the columnar decoder and
/// the record rewriter. All fields default to the server-compatible baseline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DecodeOptions {
    /// If true, OBJECT/ARRAY/MAP cells with a schema decode into navigable
    /// structured values instead of raw JSON text.
    #[serde(default)]
    pub structured_types_enabled: bool,

    /// If true, FIXED decodes to unbounded integer/rational instead of
    /// native i64/f64.
    #[serde(default)]
    pub higher_precision: bool,

    /// If true, NULLs are admitted as map values; otherwise a NULL map value
    /// is a decode error.
    #[serde(default)]
    pub map_values_nullable: bool,

    /// If true, NULLs are admitted as array elements; otherwise a NULL
    /// element is a decode error.
    #[serde(default)]
    pub array_values_nullable: bool,

    /// Target unit for rewritten timestamp columns.
    #[serde(default)]
    pub timestamp_unit: TimestampUnit,

    /// UTF-8 validation policy for rewritten string columns.
    #[serde(default)]
    pub utf8_validation: Utf8Policy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_server_compatible() {
        let opts = DecodeOptions::default();
        assert!(!opts.structured_types_enabled);
        assert!(!opts.higher_precision);
        assert_eq!(opts.timestamp_unit, TimestampUnit::Original);
        assert_eq!(opts.utf8_validation, Utf8Policy::Off);
    }

    #[test]
    fn test_snake_case_round_trip() {
        let opts = DecodeOptions {
            timestamp_unit: TimestampUnit::Microsecond,
            utf8_validation: Utf8Policy::Replace,
            ..Default::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"timestamp_unit\":\"microsecond\""));
        let back: DecodeOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
