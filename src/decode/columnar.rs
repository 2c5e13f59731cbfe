//! The columnar decoder: one cell of an arrow batch in, one `Value` out.
//!
//! The server ships each transport type in one of a small set of physical
//! layouts (scaled integers for temporals, structs for the composite
//! timestamp encodings, JSON strings as the semistructured fallback for
//! OBJECT/ARRAY/MAP). Dispatch is descriptor-first: the descriptor names
//! the transport type, the physical layout is then checked against the
//! layouts that type admits, and anything else is a `SchemaMismatch`.

use crate::config::DecodeOptions;
use crate::decode::{check_array_null, check_map_null, pow10, split_scaled_epoch};
use crate::error::HailstoneError;
use crate::params::SessionParams;
use crate::structured::StructuredValue;
use crate::types::{FieldMetadata, TransportType};
use crate::value::{instant_from_epoch_and_fraction, offset_from_wire, Value};
use arrow::array::{
    Array, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray,
    LargeStringArray, ListArray, MapArray, StringArray, StructArray,
    Time32MillisecondArray, Time32SecondArray, Time64MicrosecondArray,
    Time64NanosecondArray,
};
use arrow::datatypes::DataType;
use chrono_tz::Tz;
use num_bigint::BigInt;

/// Decodes the cell at `row` of `column` against its descriptor.
pub fn decode_columnar(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    if column.is_null(row) {
        return Ok(Value::Null);
    }
    match desc.transport_type {
        TransportType::Fixed => decode_fixed(column, row, desc, opts),
        TransportType::Real => match column.data_type() {
            DataType::Float64 => {
                Ok(Value::Float(downcast::<Float64Array>(column, desc)?.value(row)))
            }
            DataType::Float32 => Ok(Value::Float(f64::from(
                downcast::<Float32Array>(column, desc)?.value(row),
            ))),
            other => Err(shape_mismatch(desc, other)),
        },
        TransportType::Boolean => Ok(Value::Bool(
            downcast::<BooleanArray>(column, desc)?.value(row),
        )),
        TransportType::Text | TransportType::Variant => {
            Ok(Value::Str(string_value(column, row, desc)?))
        }
        TransportType::Binary => match column.data_type() {
            DataType::Binary => Ok(Value::Bytes(
                downcast::<BinaryArray>(column, desc)?.value(row).to_vec(),
            )),
            DataType::LargeBinary => Ok(Value::Bytes(
                downcast::<LargeBinaryArray>(column, desc)?.value(row).to_vec(),
            )),
            other => Err(shape_mismatch(desc, other)),
        },
        TransportType::Date => {
            let days = match column.data_type() {
                DataType::Date32 => {
                    i64::from(downcast::<Date32Array>(column, desc)?.value(row))
                }
                DataType::Int32 => {
                    i64::from(downcast::<Int32Array>(column, desc)?.value(row))
                }
                other => return Err(shape_mismatch(desc, other)),
            };
            let instant = instant_from_epoch_and_fraction(days * 86_400, 0)?;
            Ok(Value::Timestamp(instant.fixed_offset()))
        }
        TransportType::Time => {
            let (count, scale) = time_count(column, row, desc)?;
            let nanos = count * pow10(9 - scale)?;
            let instant = instant_from_epoch_and_fraction(
                nanos.div_euclid(1_000_000_000),
                nanos.rem_euclid(1_000_000_000),
            )?;
            Ok(Value::Timestamp(instant.fixed_offset()))
        }
        TransportType::TimestampNtz | TransportType::TimestampLtz => {
            let (epoch, fraction) = epoch_and_fraction(column, row, desc)?;
            let instant = instant_from_epoch_and_fraction(epoch, fraction)?;
            if desc.transport_type == TransportType::TimestampLtz {
                Ok(Value::Timestamp(instant.with_timezone(&tz).fixed_offset()))
            } else {
                Ok(Value::Timestamp(instant.fixed_offset()))
            }
        }
        TransportType::TimestampTz => decode_timestamp_tz(column, row, desc),
        TransportType::Object => decode_object(column, row, desc, tz, opts, params),
        TransportType::Array => decode_array(column, row, desc, tz, opts, params),
        TransportType::Map => decode_map(column, row, desc, tz, opts, params),
        other => Err(HailstoneError::UnsupportedType(format!(
            "cannot decode a columnar {} cell",
            other
        ))),
    }
}

//==================================================================================
// Scalar layouts
//==================================================================================

fn decode_fixed(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
) -> Result<Value, HailstoneError> {
    if let DataType::Decimal128(_, physical_scale) = column.data_type() {
        let scale = i64::from(*physical_scale);
        let v = downcast::<Decimal128Array>(column, desc)?.value(row);
        return if opts.higher_precision {
            if scale == 0 {
                Ok(Value::BigInt(BigInt::from(v)))
            } else {
                Ok(Value::BigDecimal(bigdecimal::BigDecimal::new(
                    BigInt::from(v),
                    scale,
                )))
            }
        } else if scale == 0 {
            let v = i64::try_from(v).map_err(|_| {
                HailstoneError::NumberParse(format!(
                    "column '{}': {} exceeds i64 range",
                    desc.name, v
                ))
            })?;
            Ok(Value::Int(v))
        } else {
            Ok(Value::Float(v as f64 / 10f64.powi(scale as i32)))
        };
    }
    let v = int_value(column, row, desc)?;
    let scale = desc.scale;
    if opts.higher_precision {
        if scale == 0 {
            Ok(Value::BigInt(BigInt::from(v)))
        } else {
            Ok(Value::BigDecimal(bigdecimal::BigDecimal::new(
                BigInt::from(v),
                scale,
            )))
        }
    } else if scale == 0 {
        Ok(Value::Int(v))
    } else {
        Ok(Value::Float(v as f64 / 10f64.powi(scale as i32)))
    }
}

fn int_value(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<i64, HailstoneError> {
    match column.data_type() {
        DataType::Int64 => Ok(downcast::<Int64Array>(column, desc)?.value(row)),
        DataType::Int32 => Ok(i64::from(downcast::<Int32Array>(column, desc)?.value(row))),
        DataType::Int16 => Ok(i64::from(downcast::<Int16Array>(column, desc)?.value(row))),
        DataType::Int8 => Ok(i64::from(downcast::<Int8Array>(column, desc)?.value(row))),
        other => Err(shape_mismatch(desc, other)),
    }
}

fn string_value(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<String, HailstoneError> {
    match column.data_type() {
        DataType::Utf8 => Ok(downcast::<StringArray>(column, desc)?.value(row).to_string()),
        DataType::LargeUtf8 => Ok(downcast::<LargeStringArray>(column, desc)?
            .value(row)
            .to_string()),
        other => Err(shape_mismatch(desc, other)),
    }
}

/// Time-of-day count and its scale: arrow time types carry the scale in the
/// unit, plain integer columns use the descriptor's scale.
pub(crate) fn time_count(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<(i64, i64), HailstoneError> {
    match column.data_type() {
        DataType::Int64 | DataType::Int32 => Ok((int_value(column, row, desc)?, desc.scale)),
        DataType::Time32(arrow::datatypes::TimeUnit::Second) => Ok((
            i64::from(downcast::<Time32SecondArray>(column, desc)?.value(row)),
            0,
        )),
        DataType::Time32(arrow::datatypes::TimeUnit::Millisecond) => Ok((
            i64::from(downcast::<Time32MillisecondArray>(column, desc)?.value(row)),
            3,
        )),
        DataType::Time64(arrow::datatypes::TimeUnit::Microsecond) => Ok((
            downcast::<Time64MicrosecondArray>(column, desc)?.value(row),
            6,
        )),
        DataType::Time64(arrow::datatypes::TimeUnit::Nanosecond) => Ok((
            downcast::<Time64NanosecondArray>(column, desc)?.value(row),
            9,
        )),
        other => Err(shape_mismatch(desc, other)),
    }
}

//==================================================================================
// Composite timestamp layouts
//==================================================================================

/// NTZ/LTZ physical layouts: a scaled Int64, or a struct of
/// `(epoch seconds, nano fraction)`.
pub(crate) fn epoch_and_fraction(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<(i64, i64), HailstoneError> {
    match column.data_type() {
        DataType::Int64 => {
            let v = downcast::<Int64Array>(column, desc)?.value(row);
            split_scaled_epoch(v, desc.scale)
        }
        DataType::Struct(_) => {
            let s = downcast::<StructArray>(column, desc)?;
            let epoch = struct_i64(s, "epoch", 0, row, desc)?;
            let fraction = struct_i32(s, "fraction", 1, row, desc)?;
            Ok((epoch, i64::from(fraction)))
        }
        other => Err(shape_mismatch(desc, other)),
    }
}

/// TZ physical layouts: `(scaled value, tz)` or `(epoch, fraction, tz)`.
fn decode_timestamp_tz(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<Value, HailstoneError> {
    let s = match column.data_type() {
        DataType::Struct(_) => downcast::<StructArray>(column, desc)?,
        other => return Err(shape_mismatch(desc, other)),
    };
    let (epoch, fraction, tz_token) = if s.num_columns() >= 3 {
        (
            struct_i64(s, "epoch", 0, row, desc)?,
            i64::from(struct_i32(s, "fraction", 1, row, desc)?),
            struct_i32(s, "timezone", 2, row, desc)?,
        )
    } else {
        let v = struct_i64(s, "epoch", 0, row, desc)?;
        let (epoch, fraction) = split_scaled_epoch(v, desc.scale)?;
        (epoch, fraction, struct_i32(s, "timezone", 1, row, desc)?)
    };
    let offset = offset_from_wire(i64::from(tz_token))?;
    let instant = instant_from_epoch_and_fraction(epoch, fraction)?;
    Ok(Value::Timestamp(instant.with_timezone(&offset)))
}

fn struct_child<'a>(
    s: &'a StructArray,
    name: &str,
    index: usize,
    desc: &FieldMetadata,
) -> Result<&'a dyn Array, HailstoneError> {
    s.column_by_name(name)
        .or_else(|| (index < s.num_columns()).then(|| s.column(index)))
        .map(|c| c.as_ref())
        .ok_or_else(|| {
            HailstoneError::SchemaMismatch(format!(
                "column '{}': composite timestamp lacks a '{}' member",
                desc.name, name
            ))
        })
}

pub(crate) fn struct_i64(
    s: &StructArray,
    name: &str,
    index: usize,
    row: usize,
    desc: &FieldMetadata,
) -> Result<i64, HailstoneError> {
    let child = struct_child(s, name, index, desc)?;
    Ok(downcast::<Int64Array>(child, desc)?.value(row))
}

pub(crate) fn struct_i32(
    s: &StructArray,
    name: &str,
    index: usize,
    row: usize,
    desc: &FieldMetadata,
) -> Result<i32, HailstoneError> {
    let child = struct_child(s, name, index, desc)?;
    Ok(downcast::<Int32Array>(child, desc)?.value(row))
}

//==================================================================================
// Structured layouts
//==================================================================================

fn decode_object(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    match column.data_type() {
        // Semistructured fallback: the cell is a JSON document.
        DataType::Utf8 | DataType::LargeUtf8 => {
            let raw = string_value(column, row, desc)?;
            super::text::decode_text(Some(&raw), desc, tz, opts, params)
        }
        DataType::Struct(_) => {
            let s = downcast::<StructArray>(column, desc)?;
            let mut out = StructuredValue::new(desc.fields.clone());
            for field in &desc.fields {
                let child = s.column_by_name(&field.name).ok_or_else(|| {
                    HailstoneError::SchemaMismatch(format!(
                        "column '{}': no physical member for field '{}'",
                        desc.name, field.name
                    ))
                })?;
                let value = decode_columnar(child.as_ref(), row, field, tz, opts, params)?;
                out.insert(&field.name, value);
            }
            Ok(Value::Object(out))
        }
        other => Err(shape_mismatch(desc, other)),
    }
}

fn decode_array(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    match column.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            let raw = string_value(column, row, desc)?;
            super::text::decode_text(Some(&raw), desc, tz, opts, params)
        }
        DataType::List(_) => {
            let element_desc = desc.element().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "ARRAY column '{}' lacks an element descriptor",
                    desc.name
                ))
            })?;
            let list = downcast::<ListArray>(column, desc)?;
            let values = list.value(row);
            let mut out = Vec::with_capacity(values.len());
            for j in 0..values.len() {
                if values.is_null(j) {
                    check_array_null(opts, &desc.name)?;
                    out.push(Value::Null);
                } else {
                    out.push(decode_columnar(
                        values.as_ref(),
                        j,
                        element_desc,
                        tz,
                        opts,
                        params,
                    )?);
                }
            }
            Ok(Value::Array(out))
        }
        other => Err(shape_mismatch(desc, other)),
    }
}

fn decode_map(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
    tz: Tz,
    opts: &DecodeOptions,
    params: &SessionParams,
) -> Result<Value, HailstoneError> {
    match column.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            let raw = string_value(column, row, desc)?;
            super::text::decode_text(Some(&raw), desc, tz, opts, params)
        }
        DataType::Map(_, _) => {
            let (key_desc, value_desc) = desc.map_entries().ok_or_else(|| {
                HailstoneError::SchemaMismatch(format!(
                    "MAP column '{}' lacks key/value descriptors",
                    desc.name
                ))
            })?;
            let map = downcast::<MapArray>(column, desc)?;
            let start = map.value_offsets()[row] as usize;
            let end = map.value_offsets()[row + 1] as usize;
            let keys = map.keys();
            let items = map.values();
            let mut out = Vec::with_capacity(end - start);
            for j in start..end {
                let key = match decode_columnar(
                    keys.as_ref(),
                    j,
                    key_desc,
                    tz,
                    opts,
                    params,
                )? {
                    Value::Str(s) => crate::value::MapKey::Text(s),
                    Value::Int(i) => crate::value::MapKey::Int(i),
                    other => {
                        return Err(HailstoneError::MapKeyTypeUnsupported(
                            other.type_name().to_string(),
                        ))
                    }
                };
                let value = if items.is_null(j) {
                    check_map_null(opts, &desc.name)?;
                    Value::Null
                } else {
                    decode_columnar(items.as_ref(), j, value_desc, tz, opts, params)?
                };
                out.push((key, value));
            }
            Ok(Value::Map(out))
        }
        other => Err(shape_mismatch(desc, other)),
    }
}

//==================================================================================
// Downcast plumbing
//==================================================================================

fn downcast<'a, T: 'static>(
    column: &'a dyn Array,
    desc: &FieldMetadata,
) -> Result<&'a T, HailstoneError> {
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        HailstoneError::SchemaMismatch(format!(
            "column '{}': physical layout {} does not fit descriptor type {}",
            desc.name,
            column.data_type(),
            desc.transport_type
        ))
    })
}

fn shape_mismatch(desc: &FieldMetadata, actual: &DataType) -> HailstoneError {
    HailstoneError::SchemaMismatch(format!(
        "column '{}': {} admits no {} layout",
        desc.name, desc.transport_type, actual
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Builder, MapBuilder, StringBuilder};
    use arrow::datatypes::Field;
    use std::sync::Arc;

    fn opts() -> DecodeOptions {
        DecodeOptions::default()
    }

    #[test]
    fn test_fixed_decimal_paths() {
        let params = SessionParams::new();
        let desc = FieldMetadata::fixed(38, 2).with_name("AMOUNT");
        let col = Decimal128Array::from(vec![Some(12345_i128), None])
            .with_precision_and_scale(38, 2)
            .unwrap();

        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        assert_eq!(v, Value::Float(123.45));
        let v = decode_columnar(&col, 1, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        assert_eq!(v, Value::Null);

        let high = DecodeOptions {
            higher_precision: true,
            ..opts()
        };
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &high, &params).unwrap();
        match v {
            Value::BigDecimal(d) => assert_eq!(d.to_string(), "123.45"),
            other => panic!("expected bigdecimal, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_int64_scale_zero() {
        let params = SessionParams::new();
        let desc = FieldMetadata::fixed(18, 0).with_name("N");
        let col = Int64Array::from(vec![7]);
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn test_date_day_count() {
        let params = SessionParams::new();
        let desc = FieldMetadata::scalar(TransportType::Date).with_name("D");
        let col = Date32Array::from(vec![19_888]);
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        match v {
            Value::Timestamp(t) => assert_eq!(t.timestamp(), 19_888 * 86_400),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_scaled_int64_timestamp_ntz() {
        let params = SessionParams::new();
        let mut desc = FieldMetadata::scalar(TransportType::TimestampNtz).with_name("T");
        desc.scale = 3;
        let col = Int64Array::from(vec![1_609_459_200_123_i64]);
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        match v {
            Value::Timestamp(t) => {
                assert_eq!(t.timestamp(), 1_609_459_200);
                assert_eq!(t.timestamp_subsec_millis(), 123);
            }
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_timestamp_tz_three_field_form() {
        let params = SessionParams::new();
        let mut desc = FieldMetadata::scalar(TransportType::TimestampTz).with_name("T");
        desc.scale = 9;
        let col = StructArray::from(vec![
            (
                Arc::new(Field::new("epoch", DataType::Int64, false)),
                Arc::new(Int64Array::from(vec![1_609_459_200_i64])) as arrow::array::ArrayRef,
            ),
            (
                Arc::new(Field::new("fraction", DataType::Int32, false)),
                Arc::new(Int32Array::from(vec![123_456_789])) as arrow::array::ArrayRef,
            ),
            (
                Arc::new(Field::new("timezone", DataType::Int32, false)),
                Arc::new(Int32Array::from(vec![1500])) as arrow::array::ArrayRef,
            ),
        ]);
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params).unwrap();
        match v {
            Value::Timestamp(t) => {
                assert_eq!(t.timestamp(), 1_609_459_200);
                assert_eq!(t.timestamp_subsec_nanos(), 123_456_789);
                assert_eq!(t.offset().local_minus_utc(), 3600);
            }
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_object_recurses_by_field_name() {
        let params = SessionParams::new();
        let desc = FieldMetadata::object_of(vec![
            FieldMetadata::scalar(TransportType::Text).with_name("name"),
            FieldMetadata::fixed(18, 0).with_name("count"),
        ])
        .with_name("O");
        let col = StructArray::from(vec![
            (
                Arc::new(Field::new("name", DataType::Utf8, true)),
                Arc::new(StringArray::from(vec!["x"])) as arrow::array::ArrayRef,
            ),
            (
                Arc::new(Field::new("count", DataType::Int64, true)),
                Arc::new(Int64Array::from(vec![5_i64])) as arrow::array::ArrayRef,
            ),
        ]);
        let structured = DecodeOptions {
            structured_types_enabled: true,
            ..opts()
        };
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &structured, &params).unwrap();
        let sv = match v {
            Value::Object(sv) => sv,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(sv.get_string("name").unwrap(), "x");
        assert_eq!(sv.get_i64("count").unwrap(), 5);
    }

    #[test]
    fn test_list_array_decodes_elements() {
        let params = SessionParams::new();
        let desc = FieldMetadata::array_of(FieldMetadata::fixed(18, 0)).with_name("A");
        let col = ListArray::from_iter_primitive::<arrow::datatypes::Int64Type, _, _>(vec![
            Some(vec![Some(1), Some(2), None]),
        ]);
        let lax = DecodeOptions {
            structured_types_enabled: true,
            array_values_nullable: true,
            ..opts()
        };
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &lax, &params).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Null])
        );

        let strict = DecodeOptions {
            structured_types_enabled: true,
            ..opts()
        };
        assert!(matches!(
            decode_columnar(&col, 0, &desc, chrono_tz::UTC, &strict, &params),
            Err(HailstoneError::NullInContainer(_))
        ));
    }

    #[test]
    fn test_map_array_decodes_pairs() {
        let params = SessionParams::new();
        let desc = FieldMetadata::map_of(
            FieldMetadata::scalar(TransportType::Text),
            FieldMetadata::fixed(18, 0),
        )
        .with_name("M");
        let mut builder = MapBuilder::new(None, StringBuilder::new(), Int64Builder::new());
        builder.keys().append_value("a");
        builder.values().append_value(1);
        builder.keys().append_value("b");
        builder.values().append_value(2);
        builder.append(true).unwrap();
        let col = builder.finish();

        let structured = DecodeOptions {
            structured_types_enabled: true,
            ..opts()
        };
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &structured, &params).unwrap();
        assert_eq!(
            v,
            Value::Map(vec![
                (crate::value::MapKey::Text("a".to_string()), Value::Int(1)),
                (crate::value::MapKey::Text("b".to_string()), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn test_json_string_fallback_for_structured_column() {
        let params = SessionParams::new();
        let desc = FieldMetadata::array_of(FieldMetadata::fixed(18, 0)).with_name("A");
        let col = StringArray::from(vec!["[1,2,3]"]);
        let structured = DecodeOptions {
            structured_types_enabled: true,
            ..opts()
        };
        let v = decode_columnar(&col, 0, &desc, chrono_tz::UTC, &structured, &params).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let params = SessionParams::new();
        let desc = FieldMetadata::scalar(TransportType::Boolean).with_name("B");
        let col = Int64Array::from(vec![1_i64]);
        assert!(matches!(
            decode_columnar(&col, 0, &desc, chrono_tz::UTC, &opts(), &params),
            Err(HailstoneError::SchemaMismatch(_))
        ));
    }
}
