//! The textual decoder: one JSON-rowset cell in, one `Value` out.
//!
//! Top-level numeric and textual cells pass through as raw strings; numeric
//! widening is the row-scan layer's responsibility. Temporal cells carry
//! the compact wire encodings (`sec[.frac]`, day counts, the two-token
//! TIMESTAMP_TZ form). Structured cells are JSON documents decoded against
//! the column's descriptor, with number text preserved so FIXED values
//! survive the trip untouched.

use crate::config::DecodeOptions;
use crate::decode::{check_array_null, check_map_null};
use crate::error::HailstoneError;
use crate::params::SessionParams;
use crate::structured::StructuredValue;
use crate::timefmt;
use crate::types::{FieldMetadata, TransportType};
use crate::value::{
    instant_from_epoch_nanos, offset_from_wire, parse_seconds_and_fraction, MapKey, Value,
};
use bigdecimal::BigDecimal;
use chrono_tz::Tz;
use num_bigint::BigInt;
use serde_json::Value as JsonValue;
use std::str::FromStr;

const SECS_PER_DAY: i64 = 86_400;

/// Decodes one textual cell against its column descriptor. `raw = None`
/// is a server NULL regardless of the descriptor's advisory nullability.
pub fn decode_text(
    raw: Option<&str>,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(Value::Null),
    };
    match desc.transport_type {
        // Raw passthrough; the row-scan layer widens numbers on demand.
        TransportType::Text
        | TransportType::Fixed
        | TransportType::Real
        | TransportType::Variant
        | TransportType::Boolean => Ok(Value::Str(raw.to_string())),

        TransportType::Date => {
            let days: i64 = raw
                .parse()
                .map_err(|e| HailstoneError::NumberParse(format!("DATE '{}': {}", raw, e)))?;
            let instant = instant_from_epoch_nanos(
                days as i128 * SECS_PER_DAY as i128 * 1_000_000_000,
            )?;
            Ok(Value::Timestamp(instant.fixed_offset()))
        }
        TransportType::Time | TransportType::TimestampNtz => {
            let nanos = parse_seconds_and_fraction(raw)?;
            Ok(Value::Timestamp(instant_from_epoch_nanos(nanos)?.fixed_offset()))
        }
        TransportType::TimestampLtz => {
            let nanos = parse_seconds_and_fraction(raw)?;
            let instant = instant_from_epoch_nanos(nanos)?;
            Ok(Value::Timestamp(instant.with_timezone(&tz).fixed_offset()))
        }
        TransportType::TimestampTz => {
            let mut parts = raw.split(' ');
            let (nanos_text, offset_text) = match (parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(o), None) => (n, o),
                _ => return Err(HailstoneError::InvalidTimestampTz(raw.to_string())),
            };
            // Unlike NTZ/LTZ, the TZ component is epoch nanoseconds directly.
            let nanos: i128 = nanos_text
                .parse()
                .map_err(|_| HailstoneError::InvalidTimestampTz(raw.to_string()))?;
            let token: i64 = offset_text
                .parse()
                .map_err(|_| HailstoneError::InvalidTimestampTz(raw.to_string()))?;
            let offset = offset_from_wire(token)?;
            let instant = instant_from_epoch_nanos(nanos)?;
            Ok(Value::Timestamp(instant.with_timezone(&offset)))
        }

        TransportType::Binary => Ok(Value::Bytes(hex::decode(raw)?)),

        TransportType::Object | TransportType::Array | TransportType::Map => {
            if !opts.structured_types_enabled || desc.fields.is_empty() {
                // Semistructured: the JSON text is the value.
                return Ok(Value::Str(raw.to_string()));
            }
            let json: JsonValue = serde_json::from_str(raw)?;
            decode_structured_json(&json, desc, tz, opts, params)
        }

        other => Err(HailstoneError::UnsupportedType(format!(
            "cannot decode a textual {} cell",
            other
        ))),
    }
}

//==================================================================================
// Structured JSON coercion (shared with the columnar JSON-string fallback)
//==================================================================================

/// Coerces a parsed JSON document against a structured descriptor.
pub(crate) fn decode_structured_json(
    json: &JsonValue,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    match desc.transport_type {
        TransportType::Object => {
            let map = json.as_object().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "OBJECT column '{}' holds non-object JSON",
                    desc.name
                ))
            })?;
            let mut out = StructuredValue::new(desc.fields.clone());
            for field in &desc.fields {
                let element = match map.get(&field.name) {
                    None | Some(JsonValue::Null) => Value::Null,
                    Some(element) => coerce_element(element, field, tz, opts, params)?,
                };
                out.insert(&field.name, element);
            }
            Ok(Value::Object(out))
        }
        TransportType::Array => {
            let element_desc = desc.element().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "ARRAY column '{}' lacks an element descriptor",
                    desc.name
                ))
            })?;
            let items = json.as_array().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "ARRAY column '{}' holds non-array JSON",
                    desc.name
                ))
            })?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if item.is_null() {
                    check_array_null(opts, &desc.name)?;
                    out.push(Value::Null);
                } else {
                    out.push(coerce_element(item, element_desc, tz, opts, params)?);
                }
            }
            Ok(Value::Array(out))
        }
        TransportType::Map => {
            let (key_desc, value_desc) = desc.map_entries().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "MAP column '{}' lacks key/value descriptors",
                    desc.name
                ))
            })?;
            let map = json.as_object().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "MAP column '{}' holds non-object JSON",
                    desc.name
                ))
            })?;
            let mut out = Vec::with_capacity(map.len());
            for (key_text, item) in map {
                let key = decode_map_key(key_text, key_desc)?;
                let value = if item.is_null() {
                    check_map_null(opts, &desc.name)?;
                    Value::Null
                } else {
                    coerce_element(item, value_desc, tz, opts, params)?
                };
                out.push((key, value));
            }
            Ok(Value::Map(out))
        }
        other => Err(HailstoneError::SchemaMismatch(format!(
            "{} is not a structured type",
            other
        ))),
    }
}

/// JSON keys arrive as strings; integer-keyed maps parse them decimally.
pub(crate) fn decode_map_key(
    text: &str,
    key_desc: &FieldMetadata,
) -> Result<MapKey, HailstoneError> {
    match key_desc.transport_type {
        TransportType::Text => Ok(MapKey::Text(text.to_string())),
        TransportType::Fixed if key_desc.scale == 0 => Ok(MapKey::Int(text.parse()?)),
        other => Err(HailstoneError::MapKeyTypeUnsupported(format!(
            "{} (scale {})",
            other, key_desc.scale
        ))),
    }
}

/// One non-null JSON element coerced by its element descriptor.
fn coerce_element(
    json: &JsonValue,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    match desc.transport_type {
        TransportType::Text => match json {
            JsonValue::String(s) => Ok(Value::Str(s.clone())),
            other => Err(type_clash(desc, "string", other)),
        },
        TransportType::Fixed => {
            let text = number_text(json).ok_or_else(|| type_clash(desc, "number", json))?;
            if desc.scale == 0 {
                if opts.higher_precision {
                    let n = BigInt::from_str(&text)
                        .map_err(|e| HailstoneError::NumberParse(format!("'{}': {}", text, e)))?;
                    Ok(Value::BigInt(n))
                } else {
                    Ok(Value::Int(text.parse()?))
                }
            } else if opts.higher_precision {
                let n = BigDecimal::from_str(&text)
                    .map_err(|e| HailstoneError::NumberParse(format!("'{}': {}", text, e)))?;
                Ok(Value::BigDecimal(n))
            } else {
                Ok(Value::Float(text.parse()?))
            }
        }
        TransportType::Real => {
            let text = number_text(json).ok_or_else(|| type_clash(desc, "number", json))?;
            Ok(Value::Float(text.parse()?))
        }
        TransportType::Boolean => match json {
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(type_clash(desc, "bool", other)),
        },
        TransportType::Binary => match json {
            JsonValue::String(s) => Ok(Value::Bytes(hex::decode(s)?)),
            other => Err(type_clash(desc, "hex string", other)),
        },
        TransportType::Date
        | TransportType::Time
        | TransportType::TimestampNtz
        | TransportType::TimestampLtz
        | TransportType::TimestampTz => match json {
            JsonValue::String(s) => {
                let parsed =
                    timefmt::parse_structured_datetime(desc.transport_type, s, tz, params)?;
                Ok(Value::Timestamp(parsed))
            }
            other => Err(type_clash(desc, "datetime string", other)),
        },
        TransportType::Object | TransportType::Array | TransportType::Map => {
            decode_structured_json(json, desc, tz, opts, params)
        }
        other => Err(HailstoneError::UnsupportedType(format!(
            "{} element in a structured container",
            other
        ))),
    }
}

/// The literal digits of a JSON number (text preserved by
/// `arbitrary_precision`), or of a number shipped as a string.
fn number_text(json: &JsonValue) -> Option<String> {
    match json {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn type_clash(desc: &FieldMetadata, expected: &str, actual: &JsonValue) -> HailstoneError {
    HailstoneError::SchemaMismatch(format!(
        "field '{}' expects {}, JSON holds {}",
        desc.name,
        expected,
        json_kind(actual)
    ))
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
