//! The dynamically-typed host value produced by the decoders.
//!
//! Both the textual (JSON) and the columnar paths materialize server cells
//! into this one model; the driver facade then hands values to the caller
//! through the standard row interface or the structured-reader getters.
//!
//! Timestamps are instants carried as `DateTime<FixedOffset>`: the offset
//! preserves the wall clock for TIMESTAMP_TZ and the session zone for
//! TIMESTAMP_LTZ, while comparisons and arithmetic see the same instant.

use crate::error::HailstoneError;
use crate::structured::StructuredValue;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, Utc};
use num_bigint::BigInt;

/// Offset minutes are wire-encoded as `minutes + 1440`, centered on UTC.
pub const TZ_OFFSET_BIAS: i64 = 1440;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A decoded server value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Unbounded integer, produced only in higher-precision mode.
    BigInt(BigInt),
    /// Unbounded-precision rational, produced only in higher-precision mode.
    BigDecimal(BigDecimal),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
    Array(Vec<Value>),
    Map(Vec<(MapKey, Value)>),
    Object(StructuredValue),
}

/// A map key: the warehouse admits TEXT and integer FIXED keys only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Text(String),
    Int(i64),
}

impl Value {
    /// Short name used in `WrongType` diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "i64",
            Value::Float(_) => "f64",
            Value::BigInt(_) => "bigint",
            Value::BigDecimal(_) => "bigdecimal",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl std::fmt::Display for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapKey::Text(s) => write!(f, "{}", s),
            MapKey::Int(i) => write!(f, "{}", i),
        }
    }
}

//==================================================================================
// Temporal composition helpers (shared by the bind and decode paths)
//==================================================================================

/// Builds the UTC instant at `total_nanos` since the Unix epoch.
pub(crate) fn instant_from_epoch_nanos(
    total_nanos: i128,
) -> Result<DateTime<Utc>, HailstoneError> {
    let secs = total_nanos.div_euclid(NANOS_PER_SEC);
    let nanos = total_nanos.rem_euclid(NANOS_PER_SEC) as u32;
    let secs = i64::try_from(secs).map_err(|_| {
        HailstoneError::NumberParse(format!("epoch seconds out of range: {}", secs))
    })?;
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| {
        HailstoneError::NumberParse(format!("instant out of range: {}s {}ns", secs, nanos))
    })
}

/// Builds the UTC instant for `(epoch seconds, nano fraction)`.
pub(crate) fn instant_from_epoch_and_fraction(
    epoch: i64,
    fraction: i64,
) -> Result<DateTime<Utc>, HailstoneError> {
    instant_from_epoch_nanos(epoch as i128 * NANOS_PER_SEC + fraction as i128)
}

/// Decodes the wire offset token (`minutes + 1440`) into a fixed offset.
pub(crate) fn offset_from_wire(token: i64) -> Result<FixedOffset, HailstoneError> {
    (token - TZ_OFFSET_BIAS)
        .checked_mul(60)
        .and_then(|secs| i32::try_from(secs).ok())
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            HailstoneError::InvalidTimestampTz(format!("offset token {} out of range", token))
        })
}

/// Parses the textual `sec[.frac]` wire form into total epoch nanoseconds.
/// The fraction is left-padded with zeros to 9 digits before being read as
/// nanoseconds; a leading `-` applies to the whole value.
pub(crate) fn parse_seconds_and_fraction(raw: &str) -> Result<i128, HailstoneError> {
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (sec_text, frac_text) = match body.split_once('.') {
        Some((s, f)) => (s, f),
        None => (body, ""),
    };
    let secs: i128 = sec_text
        .parse::<i64>()
        .map_err(|e| HailstoneError::NumberParse(format!("'{}': {}", raw, e)))?
        as i128;
    let nanos: i128 = if frac_text.is_empty() {
        0
    } else {
        format!("{:0>9}", frac_text)
            .parse::<i64>()
            .map_err(|e| HailstoneError::NumberParse(format!("'{}': {}", raw, e)))?
            as i128
    };
    let total = secs * NANOS_PER_SEC + nanos;
    Ok(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds_and_fraction() {
        assert_eq!(parse_seconds_and_fraction("12").unwrap(), 12_000_000_000);
        // Fraction text is left-padded to 9 digits: "5" means 5 nanoseconds.
        assert_eq!(parse_seconds_and_fraction("12.5").unwrap(), 12_000_000_005);
        assert_eq!(
            parse_seconds_and_fraction("1609459200.123456789").unwrap(),
            1_609_459_200_123_456_789
        );
        assert_eq!(
            parse_seconds_and_fraction("-1.000000001").unwrap(),
            -1_000_000_001
        );
        assert!(parse_seconds_and_fraction("abc").is_err());
    }

    #[test]
    fn test_instant_composition_handles_negative_nanos() {
        let t = instant_from_epoch_nanos(-1).unwrap();
        assert_eq!(t.timestamp(), -1);
        assert_eq!(t.timestamp_subsec_nanos(), 999_999_999);
    }

    #[test]
    fn test_offset_from_wire() {
        assert_eq!(offset_from_wire(1440).unwrap().local_minus_utc(), 0);
        assert_eq!(offset_from_wire(1500).unwrap().local_minus_utc(), 3600);
        assert_eq!(offset_from_wire(960).unwrap().local_minus_utc(), -28_800);
        assert!(offset_from_wire(10_000).is_err());
    }
}
