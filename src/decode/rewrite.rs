//! The columnar record rewriter: server-shaped batches in, driver-shaped
//! batches out.
//!
//! The server's physical layouts (scaled integers, composite timestamp
//! structs, decimal FIXED) are rewritten column by column into the logical
//! arrow types a host application expects. The rewriter never mutates its
//! input; offsets and null buffers are carried over, so null positions are
//! preserved at identical row indices, nested columns included.

use crate::config::{DecodeOptions, TimestampUnit, Utf8Policy};
use crate::decode::columnar::{epoch_and_fraction, struct_i32, struct_i64, time_count};
use crate::decode::{pow10, split_scaled_epoch};
use crate::error::HailstoneError;
use crate::types::{FieldMetadata, TransportType};
use arrow::array::{
    Array, ArrayRef, BinaryArray, Float64Array, LargeBinaryArray, ListArray, MapArray,
    StringArray, StructArray, Time64NanosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Fields, Schema};
use arrow::record_batch::RecordBatch;
use bigdecimal::BigDecimal;
use chrono_tz::Tz;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::sync::Arc;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Rewrites every column of `batch` by its row-type descriptor and returns
/// a new batch with the rewritten schema.
pub fn rewrite_record(
    batch: &RecordBatch,
    row_types: &[FieldMetadata],
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<RecordBatch, HailstoneError> {
    if batch.num_columns() != row_types.len() {
        return Err(HailstoneError::SchemaMismatch(format!(
            "batch has {} columns, row type has {}",
            batch.num_columns(),
            row_types.len()
        )));
    }
    let mut columns = Vec::with_capacity(batch.num_columns());
    let mut fields = Vec::with_capacity(batch.num_columns());
    for (i, desc) in row_types.iter().enumerate() {
        let input_field = batch.schema_ref().field(i).clone();
        let rewritten = rewrite_column(batch.column(i), desc, opts, tz)?;
        fields.push(Arc::new(
            Field::new(
                input_field.name(),
                rewritten.data_type().clone(),
                input_field.is_nullable(),
            )
            .with_metadata(input_field.metadata().clone()),
        ));
        columns.push(rewritten);
    }
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(Fields::from(fields))),
        columns,
    )?)
}

fn rewrite_column(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<ArrayRef, HailstoneError> {
    match desc.transport_type {
        TransportType::Fixed => rewrite_fixed(column, desc, opts),
        TransportType::Time => rewrite_time(column, desc),
        TransportType::TimestampNtz | TransportType::TimestampLtz | TransportType::TimestampTz => {
            rewrite_timestamp(column, desc, opts, tz)
        }
        TransportType::Text => rewrite_text(column, desc, opts),
        TransportType::Object => rewrite_object(column, desc, opts, tz),
        TransportType::Array => rewrite_array(column, desc, opts, tz),
        TransportType::Map => rewrite_map(column, desc, opts, tz),
        _ => Ok(column.clone()),
    }
}

//==================================================================================
// 1. FIXED
//==================================================================================

fn rewrite_fixed(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
) -> Result<ArrayRef, HailstoneError> {
    match column.data_type() {
        DataType::Decimal128(_, physical_scale) => {
            if opts.higher_precision {
                return Ok(column.clone());
            }
            let target = if *physical_scale == 0 {
                DataType::Int64
            } else {
                DataType::Float64
            };
            Ok(cast(column, &target)?)
        }
        DataType::Int64 if desc.scale > 0 && !opts.higher_precision => {
            // f64 division by 10^scale alone loses bits for large counts;
            // go through an unbounded-rational intermediate.
            let ints = column
                .as_any()
                .downcast_ref::<arrow::array::Int64Array>()
                .ok_or_else(|| mismatch(desc, column.data_type()))?;
            let rewritten: Float64Array = ints
                .iter()
                .map(|v| {
                    v.map(|v| {
                        BigDecimal::new(BigInt::from(v), desc.scale)
                            .to_f64()
                            .unwrap_or(f64::NAN)
                    })
                })
                .collect();
            Ok(Arc::new(rewritten))
        }
        _ => Ok(column.clone()),
    }
}

//==================================================================================
// 2. Temporals
//==================================================================================

fn rewrite_time(column: &ArrayRef, desc: &FieldMetadata) -> Result<ArrayRef, HailstoneError> {
    if matches!(
        column.data_type(),
        DataType::Time64(arrow::datatypes::TimeUnit::Nanosecond)
    ) {
        return Ok(column.clone());
    }
    let mut values: Vec<Option<i64>> = Vec::with_capacity(column.len());
    for row in 0..column.len() {
        if column.is_null(row) {
            values.push(None);
            continue;
        }
        let (count, scale) = time_count(column.as_ref(), row, desc)?;
        values.push(Some(count * pow10(9 - scale)?));
    }
    Ok(Arc::new(Time64NanosecondArray::from(values)))
}

fn rewrite_timestamp(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<ArrayRef, HailstoneError> {
    let unit = match opts.timestamp_unit {
        TimestampUnit::Original => return Ok(column.clone()),
        unit => unit,
    };
    let mut nanos: Vec<Option<i128>> = Vec::with_capacity(column.len());
    for row in 0..column.len() {
        if column.is_null(row) {
            nanos.push(None);
            continue;
        }
        nanos.push(Some(instant_nanos(column.as_ref(), row, desc)?));
    }
    // LTZ columns carry the session zone name; NTZ and TZ do not.
    let zone = match desc.transport_type {
        TransportType::TimestampLtz => Some(tz.name()),
        _ => None,
    };
    let rewritten: ArrayRef = match unit {
        TimestampUnit::Second => {
            let values: Vec<Option<i64>> = truncate_all(&nanos, NANOS_PER_SEC);
            Arc::new(TimestampSecondArray::from(values).with_timezone_opt(zone))
        }
        TimestampUnit::Millisecond => {
            let values: Vec<Option<i64>> = truncate_all(&nanos, 1_000_000);
            Arc::new(TimestampMillisecondArray::from(values).with_timezone_opt(zone))
        }
        TimestampUnit::Microsecond => {
            let values: Vec<Option<i64>> = truncate_all(&nanos, 1_000);
            Arc::new(TimestampMicrosecondArray::from(values).with_timezone_opt(zone))
        }
        TimestampUnit::Nanosecond => {
            let values = nanos
                .iter()
                .map(|v| {
                    v.map(|n| {
                        i64::try_from(n).map_err(|_| {
                            HailstoneError::TooHighTimestampPrecision {
                                column: desc.name.clone(),
                            }
                        })
                    })
                    .transpose()
                })
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(TimestampNanosecondArray::from(values).with_timezone_opt(zone))
        }
        TimestampUnit::Original => unreachable!(),
    };
    Ok(rewritten)
}

/// Truncation floors, so pre-epoch instants truncate toward negative
/// infinity like everything else.
fn truncate_all(nanos: &[Option<i128>], divisor: i128) -> Vec<Option<i64>> {
    nanos
        .iter()
        .map(|v| v.map(|n| n.div_euclid(divisor) as i64))
        .collect()
}

/// Epoch nanoseconds of one timestamp cell, over any admitted physical
/// layout (scaled Int64, 2-field TZ struct, or epoch/fraction structs).
fn instant_nanos(
    column: &dyn Array,
    row: usize,
    desc: &FieldMetadata,
) -> Result<i128, HailstoneError> {
    if desc.transport_type == TransportType::TimestampTz {
        let s = column
            .as_any()
            .downcast_ref::<StructArray>()
            .ok_or_else(|| mismatch(desc, column.data_type()))?;
        let (epoch, fraction) = if s.num_columns() >= 3 {
            (
                struct_i64(s, "epoch", 0, row, desc)?,
                i64::from(struct_i32(s, "fraction", 1, row, desc)?),
            )
        } else {
            split_scaled_epoch(struct_i64(s, "epoch", 0, row, desc)?, desc.scale)?
        };
        return Ok(epoch as i128 * NANOS_PER_SEC + fraction as i128);
    }
    let (epoch, fraction) = epoch_and_fraction(column, row, desc)?;
    Ok(epoch as i128 * NANOS_PER_SEC + fraction as i128)
}

//==================================================================================
// 3. TEXT re-validation
//==================================================================================

/// Arrow `Utf8` columns are valid by construction; the policy matters when
/// TEXT arrives in a binary physical layout. Fixed values are logged per
/// column.
fn rewrite_text(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
) -> Result<ArrayRef, HailstoneError> {
    if opts.utf8_validation != Utf8Policy::Replace {
        return Ok(column.clone());
    }
    let raw: Vec<Option<&[u8]>> = match column.data_type() {
        DataType::Binary => {
            let bytes = column
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| mismatch(desc, column.data_type()))?;
            bytes.iter().collect()
        }
        DataType::LargeBinary => {
            let bytes = column
                .as_any()
                .downcast_ref::<LargeBinaryArray>()
                .ok_or_else(|| mismatch(desc, column.data_type()))?;
            bytes.iter().collect()
        }
        _ => return Ok(column.clone()),
    };
    let mut fixed_rows = 0usize;
    let rewritten: StringArray = raw
        .iter()
        .map(|v| {
            v.map(|bytes| {
                let text = String::from_utf8_lossy(bytes);
                if text.as_bytes() != bytes {
                    fixed_rows += 1;
                }
                text.into_owned()
            })
        })
        .collect();
    if fixed_rows > 0 {
        log::warn!(
            "column '{}': replaced invalid UTF-8 in {} row(s)",
            desc.name,
            fixed_rows
        );
    }
    Ok(Arc::new(rewritten))
}

//==================================================================================
// 4. Nested columns
//==================================================================================

fn rewrite_object(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<ArrayRef, HailstoneError> {
    let s = match column.as_any().downcast_ref::<StructArray>() {
        Some(s) => s,
        // Semistructured JSON-string OBJECT columns pass through.
        None => return Ok(column.clone()),
    };
    let mut fields = Vec::with_capacity(s.num_columns());
    let mut arrays = Vec::with_capacity(s.num_columns());
    for (i, child_field) in s.fields().iter().enumerate() {
        let child = s.column(i);
        let rewritten = match desc.fields.iter().find(|f| f.name == *child_field.name()) {
            Some(child_desc) => rewrite_column(child, child_desc, opts, tz)?,
            None => child.clone(),
        };
        fields.push(Arc::new(
            Field::new(
                child_field.name(),
                rewritten.data_type().clone(),
                child_field.is_nullable(),
            )
            .with_metadata(child_field.metadata().clone()),
        ));
        arrays.push(rewritten);
    }
    let rewritten = StructArray::try_new(Fields::from(fields), arrays, s.nulls().cloned())?;
    Ok(Arc::new(rewritten))
}

fn rewrite_array(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<ArrayRef, HailstoneError> {
    let list = match column.as_any().downcast_ref::<ListArray>() {
        Some(list) => list,
        None => return Ok(column.clone()),
    };
    let element_desc = match desc.element() {
        Some(element) => element,
        None => return Ok(column.clone()),
    };
    let element_field = match column.data_type() {
        DataType::List(f) => f.clone(),
        other => return Err(mismatch(desc, other)),
    };
    let values = rewrite_column(list.values(), element_desc, opts, tz)?;
    let new_field = Arc::new(
        Field::new(
            element_field.name(),
            values.data_type().clone(),
            element_field.is_nullable(),
        )
        .with_metadata(element_field.metadata().clone()),
    );
    let rewritten = ListArray::try_new(
        new_field,
        list.offsets().clone(),
        values,
        list.nulls().cloned(),
    )?;
    Ok(Arc::new(rewritten))
}

fn rewrite_map(
    column: &ArrayRef,
    desc: &FieldMetadata,
    opts: &DecodeOptions,
    tz: Tz,
) -> Result<ArrayRef, HailstoneError> {
    let map = match column.as_any().downcast_ref::<MapArray>() {
        Some(map) => map,
        None => return Ok(column.clone()),
    };
    let (key_desc, value_desc) = match desc.map_entries() {
        Some(pair) => pair,
        None => return Ok(column.clone()),
    };
    let (entries_field, ordered) = match column.data_type() {
        DataType::Map(f, ordered) => (f.clone(), *ordered),
        other => return Err(mismatch(desc, other)),
    };
    let entries = map.entries();
    let keys = rewrite_column(map.keys(), key_desc, opts, tz)?;
    let values = rewrite_column(map.values(), value_desc, opts, tz)?;
    let entry_fields = match entries_field.data_type() {
        DataType::Struct(fields) => fields,
        other => return Err(mismatch(desc, other)),
    };
    let new_entry_fields = Fields::from(vec![
        Arc::new(
            Field::new(
                entry_fields[0].name(),
                keys.data_type().clone(),
                entry_fields[0].is_nullable(),
            )
            .with_metadata(entry_fields[0].metadata().clone()),
        ),
        Arc::new(
            Field::new(
                entry_fields[1].name(),
                values.data_type().clone(),
                entry_fields[1].is_nullable(),
            )
            .with_metadata(entry_fields[1].metadata().clone()),
        ),
    ]);
    let new_entries = StructArray::try_new(
        new_entry_fields.clone(),
        vec![keys, values],
        entries.nulls().cloned(),
    )?;
    let new_entries_field = Arc::new(
        Field::new(
            entries_field.name(),
            DataType::Struct(new_entry_fields),
            entries_field.is_nullable(),
        )
        .with_metadata(entries_field.metadata().clone()),
    );
    let rewritten = MapArray::try_new(
        new_entries_field,
        map.offsets().clone(),
        new_entries,
        map.nulls().cloned(),
        ordered,
    )?;
    Ok(Arc::new(rewritten))
}

fn mismatch(desc: &FieldMetadata, actual: &DataType) -> HailstoneError {
    HailstoneError::SchemaMismatch(format!(
        "column '{}': cannot rewrite physical layout {} as {}",
        desc.name, actual, desc.transport_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Decimal128Array, Int32Array, Int64Array};

    fn batch_of(name: &str, dt: DataType, array: ArrayRef) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(name, dt, true)]));
        RecordBatch::try_new(schema, vec![array]).unwrap()
    }

    fn ntz_desc(name: &str, scale: i64) -> FieldMetadata {
        let mut desc =
            FieldMetadata::scalar(TransportType::TimestampNtz).with_name(name);
        desc.scale = scale;
        desc
    }

    #[test]
    fn test_decimal_casts_by_scale() {
        let opts = DecodeOptions::default();
        let col: ArrayRef = Arc::new(
            Decimal128Array::from(vec![Some(12345_i128), None])
                .with_precision_and_scale(38, 0)
                .unwrap(),
        );
        let batch = batch_of("N", col.data_type().clone(), col);
        let desc = FieldMetadata::fixed(38, 0).with_name("N");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).data_type(), &DataType::Int64);
        let ints = out
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ints.value(0), 12345);
        assert!(ints.is_null(1));
    }

    #[test]
    fn test_decimal_kept_under_higher_precision() {
        let opts = DecodeOptions {
            higher_precision: true,
            ..DecodeOptions::default()
        };
        let col: ArrayRef = Arc::new(
            Decimal128Array::from(vec![Some(12345_i128)])
                .with_precision_and_scale(38, 2)
                .unwrap(),
        );
        let batch = batch_of("N", col.data_type().clone(), col);
        let desc = FieldMetadata::fixed(38, 2).with_name("N");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).data_type(), &DataType::Decimal128(38, 2));
    }

    #[test]
    fn test_int64_with_scale_divides_precisely() {
        let opts = DecodeOptions::default();
        // 2^60 + 1 at scale 2: naive f64 division of the integer loses the
        // low bit before the divide; the rational path keeps it.
        let v = (1_i64 << 60) + 1;
        let col: ArrayRef = Arc::new(Int64Array::from(vec![v]));
        let batch = batch_of("N", DataType::Int64, col);
        let desc = FieldMetadata::fixed(38, 2).with_name("N");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        let floats = out
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        let expected = BigDecimal::new(BigInt::from(v), 2).to_f64().unwrap();
        assert_eq!(floats.value(0), expected);
    }

    #[test]
    fn test_time_becomes_nanosecond_time64() {
        let opts = DecodeOptions::default();
        let col: ArrayRef = Arc::new(Int32Array::from(vec![Some(49_507), None]));
        let batch = batch_of("T", DataType::Int32, col);
        let mut desc = FieldMetadata::scalar(TransportType::Time).with_name("T");
        desc.scale = 0;
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        let times = out
            .column(0)
            .as_any()
            .downcast_ref::<Time64NanosecondArray>()
            .unwrap();
        assert_eq!(times.value(0), 49_507_000_000_000);
        assert!(times.is_null(1));
    }

    #[test]
    fn test_timestamp_original_unit_is_identity() {
        let opts = DecodeOptions::default();
        let col: ArrayRef = Arc::new(Int64Array::from(vec![1_609_459_200_123_i64]));
        let batch = batch_of("T", DataType::Int64, col);
        let out =
            rewrite_record(&batch, &[ntz_desc("T", 3)], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).data_type(), &DataType::Int64);

        // Idempotence: rewriting the rewritten batch changes nothing.
        let again =
            rewrite_record(&out, &[ntz_desc("T", 3)], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out, again);
    }

    #[test]
    fn test_timestamp_truncation_floors_and_keeps_nulls() {
        let opts = DecodeOptions {
            timestamp_unit: TimestampUnit::Second,
            ..DecodeOptions::default()
        };
        // -1 ms is 0.001 s before the epoch; flooring gives -1 s.
        let col: ArrayRef = Arc::new(Int64Array::from(vec![
            Some(1_609_459_200_999_i64),
            Some(-1),
            None,
        ]));
        let batch = batch_of("T", DataType::Int64, col);
        let out =
            rewrite_record(&batch, &[ntz_desc("T", 3)], &opts, chrono_tz::UTC).unwrap();
        let seconds = out
            .column(0)
            .as_any()
            .downcast_ref::<TimestampSecondArray>()
            .unwrap();
        assert_eq!(seconds.value(0), 1_609_459_200);
        assert_eq!(seconds.value(1), -1);
        assert!(seconds.is_null(2));
    }

    #[test]
    fn test_ltz_carries_session_zone_name() {
        let opts = DecodeOptions {
            timestamp_unit: TimestampUnit::Millisecond,
            ..DecodeOptions::default()
        };
        let col: ArrayRef = Arc::new(Int64Array::from(vec![0_i64]));
        let batch = batch_of("T", DataType::Int64, col);
        let mut desc =
            FieldMetadata::scalar(TransportType::TimestampLtz).with_name("T");
        desc.scale = 0;
        let out = rewrite_record(
            &batch,
            &[desc],
            &opts,
            chrono_tz::Europe::Warsaw,
        )
        .unwrap();
        match out.column(0).data_type() {
            DataType::Timestamp(_, Some(zone)) => {
                assert_eq!(zone.as_ref(), "Europe/Warsaw")
            }
            other => panic!("expected zoned timestamp, got {}", other),
        }
    }

    #[test]
    fn test_nanosecond_overflow_names_the_column() {
        let opts = DecodeOptions {
            timestamp_unit: TimestampUnit::Nanosecond,
            ..DecodeOptions::default()
        };
        // Year 9999 in epoch seconds; the nanosecond count exceeds i64.
        let col: ArrayRef = Arc::new(Int64Array::from(vec![253_402_300_800_i64]));
        let batch = batch_of("CREATED", DataType::Int64, col);
        let err = rewrite_record(
            &batch,
            &[ntz_desc("CREATED", 0)],
            &opts,
            chrono_tz::UTC,
        )
        .unwrap_err();
        match err {
            HailstoneError::TooHighTimestampPrecision { column } => {
                assert_eq!(column, "CREATED")
            }
            other => panic!("expected precision error, got {:?}", other),
        }
    }

    #[test]
    fn test_text_in_binary_layout_is_lossily_reencoded() {
        let opts = DecodeOptions {
            utf8_validation: Utf8Policy::Replace,
            ..DecodeOptions::default()
        };
        // Row 1 carries a stray 0xFF continuation byte.
        let col: ArrayRef = Arc::new(BinaryArray::from(vec![
            Some(b"ok".as_ref()),
            Some(&[0x66, 0xFF][..]),
            None,
        ]));
        let batch = batch_of("S", DataType::Binary, col);
        let desc = FieldMetadata::scalar(TransportType::Text).with_name("S");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).data_type(), &DataType::Utf8);
        let strings = out
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(strings.value(0), "ok");
        assert_eq!(strings.value(1), "f\u{FFFD}");
        assert!(strings.is_null(2));
    }

    #[test]
    fn test_valid_utf8_passes_through_under_replace() {
        let opts = DecodeOptions {
            utf8_validation: Utf8Policy::Replace,
            ..DecodeOptions::default()
        };
        let col: ArrayRef = Arc::new(StringArray::from(vec![Some("zażółć"), None]));
        let batch = batch_of("S", DataType::Utf8, col.clone());
        let desc = FieldMetadata::scalar(TransportType::Text).with_name("S");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).as_ref(), col.as_ref());
    }

    #[test]
    fn test_untouched_types_pass_through() {
        let opts = DecodeOptions::default();
        let col: ArrayRef = Arc::new(StringArray::from(vec!["x"]));
        let batch = batch_of("S", DataType::Utf8, col);
        let desc = FieldMetadata::scalar(TransportType::Text).with_name("S");
        let out = rewrite_record(&batch, &[desc], &opts, chrono_tz::UTC).unwrap();
        assert_eq!(out.column(0).data_type(), &DataType::Utf8);
    }
}
