//! The array binder: a homogeneous host slice rendered as one wire column.
//!
//! Unlike the structured ARRAY bind (one JSON literal), an array bind ships
//! each element as its own textual literal; the server interprets the column
//! by the reported transport type. NULL positions and column length are
//! preserved exactly. The `stream` flag switches TIMESTAMP_TZ and TIME to
//! their wall-clock renderings used on the streaming ingest path.

use crate::bind::{temporal_literal, BindMode, HostValue};
use crate::error::HailstoneError;
use crate::types::TransportType;
use chrono::{DateTime, FixedOffset, Timelike};

const TZ_STREAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%9f";
const TIME_STREAM_FORMAT: &str = "%H:%M:%S.%9f";

/// Renders a homogeneous slice as `(transport type, column of literals)`.
pub fn array_bind(
    column: &HostValue,
    mode: BindMode,
    stream: bool,
) -> Result<(TransportType, Vec<Option<String>>), HailstoneError> {
    match column {
        HostValue::IntSlice(items) => Ok((
            TransportType::Fixed,
            items.iter().map(|v| v.map(|i| i.to_string())).collect(),
        )),
        HostValue::FloatSlice(items) => Ok((
            TransportType::Real,
            items.iter().map(|v| v.map(|f| f.to_string())).collect(),
        )),
        HostValue::BoolSlice(items) => Ok((
            TransportType::Boolean,
            items.iter().map(|v| v.map(|b| b.to_string())).collect(),
        )),
        HostValue::TextSlice(items) => Ok((TransportType::Text, items.clone())),
        HostValue::BytesSlice(items) => Ok((
            TransportType::Binary,
            items
                .iter()
                .map(|v| v.as_ref().map(|b| hex::encode(b)))
                .collect(),
        )),
        HostValue::TimestampSlice(items) => {
            let kind = mode.temporal_kind().ok_or_else(|| {
                HailstoneError::UnsupportedType(format!(
                    "datetime column requires a temporal mode, got {:?}",
                    mode
                ))
            })?;
            let rendered = items
                .iter()
                .map(|v| v.as_ref().map(|t| datetime_element(t, kind, stream)))
                .collect();
            Ok((kind, rendered))
        }
        HostValue::Dynamic(items) => dynamic_bind(items, mode, stream),
        other => Err(HailstoneError::UnsupportedType(format!(
            "{} is not a bindable column",
            crate::bind::host_kind(other)
        ))),
    }
}

fn datetime_element(t: &DateTime<FixedOffset>, kind: TransportType, stream: bool) -> String {
    match (kind, stream) {
        (TransportType::TimestampTz, true) => t.format(TZ_STREAM_FORMAT).to_string(),
        (TransportType::Time, true) => {
            // Wall clock, normalized away from any carried offset.
            let wall = t.time();
            format!(
                "{:02}:{:02}:{:02}.{:09}",
                wall.hour(),
                wall.minute(),
                wall.second(),
                wall.nanosecond()
            )
        }
        _ => temporal_literal(t, kind),
    }
}

/// Second pass over a runtime-typed slice: each element dispatches on its
/// own tag; the column type is taken from the first non-null element.
fn dynamic_bind(
    items: &[HostValue],
    mode: BindMode,
    stream: bool,
) -> Result<(TransportType, Vec<Option<String>>), HailstoneError> {
    let mut column_type: Option<TransportType> = None;
    let mut rendered = Vec::with_capacity(items.len());
    for item in items {
        let (element_type, literal) = match item {
            HostValue::Null
            | HostValue::Bool(None)
            | HostValue::Int(None)
            | HostValue::Float(None)
            | HostValue::Text(None)
            | HostValue::Bytes(None)
            | HostValue::Timestamp(None) => {
                rendered.push(None);
                continue;
            }
            HostValue::Bool(Some(b)) => (TransportType::Boolean, b.to_string()),
            HostValue::Int(Some(i)) => (TransportType::Fixed, i.to_string()),
            HostValue::Float(Some(f)) => (TransportType::Real, f.to_string()),
            HostValue::Text(Some(s)) => (TransportType::Text, s.clone()),
            HostValue::Bytes(Some(b)) => (TransportType::Binary, hex::encode(b)),
            HostValue::Timestamp(Some(t)) => {
                let kind = mode.temporal_kind().ok_or_else(|| {
                    HailstoneError::UnsupportedType(format!(
                        "datetime element requires a temporal mode, got {:?}",
                        mode
                    ))
                })?;
                (kind, datetime_element(t, kind, stream))
            }
            other => {
                return Err(HailstoneError::UnsupportedType(format!(
                    "{} element in a dynamic column",
                    crate::bind::host_kind(other)
                )));
            }
        };
        column_type.get_or_insert(element_type);
        rendered.push(Some(literal));
    }
    Ok((column_type.unwrap_or(TransportType::Text), rendered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_int_column() {
        let (tt, col) = array_bind(
            &HostValue::IntSlice(vec![Some(1), Some(2), Some(3)]),
            BindMode::Auto,
            false,
        )
        .unwrap();
        assert_eq!(tt, TransportType::Fixed);
        assert_eq!(
            col,
            vec![
                Some("1".to_string()),
                Some("2".to_string()),
                Some("3".to_string())
            ]
        );
    }

    #[test]
    fn test_null_positions_preserved() {
        let (tt, col) = array_bind(
            &HostValue::BoolSlice(vec![Some(true), None, Some(false)]),
            BindMode::Auto,
            false,
        )
        .unwrap();
        assert_eq!(tt, TransportType::Boolean);
        assert_eq!(
            col,
            vec![Some("true".to_string()), None, Some("false".to_string())]
        );
    }

    #[test]
    fn test_binary_column_is_lowercase_hex() {
        let (tt, col) = array_bind(
            &HostValue::BytesSlice(vec![Some(vec![0xAB, 0x01]), None]),
            BindMode::Binary,
            false,
        )
        .unwrap();
        assert_eq!(tt, TransportType::Binary);
        assert_eq!(col, vec![Some("ab01".to_string()), None]);
    }

    #[test]
    fn test_timestamp_tz_two_token_and_stream_forms() {
        let t = utc("2021-01-01T01:00:00.123456789+01:00");
        let column = HostValue::TimestampSlice(vec![Some(t)]);

        let (_, col) = array_bind(&column, BindMode::TimestampTz, false).unwrap();
        assert_eq!(
            col[0].as_deref(),
            Some("1609459200123456789 1500")
        );

        let (_, col) = array_bind(&column, BindMode::TimestampTz, true).unwrap();
        assert_eq!(col[0].as_deref(), Some("2021-01-01 01:00:00.123456789"));
    }

    #[test]
    fn test_time_stream_form() {
        let t = utc("1970-01-01T13:45:07.000000250Z");
        let column = HostValue::TimestampSlice(vec![Some(t)]);

        let (_, col) = array_bind(&column, BindMode::Time, true).unwrap();
        assert_eq!(col[0].as_deref(), Some("13:45:07.000000250"));

        let (_, col) = array_bind(&column, BindMode::Time, false).unwrap();
        assert_eq!(col[0].as_deref(), Some("49507000000250"));
    }

    #[test]
    fn test_date_column_truncates_each_element() {
        let t = utc("2024-06-15T13:45:07.250Z");
        let (tt, col) =
            array_bind(&HostValue::TimestampSlice(vec![Some(t)]), BindMode::Date, false)
                .unwrap();
        assert_eq!(tt, TransportType::Date);
        assert_eq!(col[0].as_deref(), Some("1718409600000"));
    }

    #[test]
    fn test_dynamic_column_dispatches_per_element() {
        let column = HostValue::Dynamic(vec![
            HostValue::Int(Some(7)),
            HostValue::Null,
            HostValue::Int(Some(9)),
        ]);
        let (tt, col) = array_bind(&column, BindMode::Auto, false).unwrap();
        assert_eq!(tt, TransportType::Fixed);
        assert_eq!(col, vec![Some("7".to_string()), None, Some("9".to_string())]);
    }

    #[test]
    fn test_dynamic_column_rejects_nested_slice() {
        let column = HostValue::Dynamic(vec![HostValue::TextSlice(vec![])]);
        assert!(matches!(
            array_bind(&column, BindMode::Auto, false),
            Err(HailstoneError::UnsupportedType(_))
        ));
    }
}
