//! Result decoding: textual (JSON) rowsets, columnar batches, and the
//! columnar record rewriter.
//!
//! All three paths share the schema descriptors of `types::FieldMetadata`
//! and materialize into the dynamic `Value` model. The rewriter instead
//! produces a new arrow `RecordBatch` with driver-friendly logical types.

pub mod columnar;
pub mod rewrite;
pub mod text;


pub use columnar::decode_columnar;
pub use rewrite::rewrite_record;
pub use text::decode_text;

use crate::config::DecodeOptions;
use crate::error::HailstoneError;

/// `10^scale` for the scaled-integer temporal encodings. Scale is bounded
/// by the server at 9.
pub(crate) fn pow10(scale: i64) -> Result<i64, HailstoneError> {
    if !(0..=18).contains(&scale) {
        return Err(HailstoneError::SchemaMismatch(format!(
            "scale {} out of range",
            scale
        )));
    }
    Ok(10_i64.pow(scale as u32))
}

/// Splits a scaled-integer timestamp (`value` counted at `10^scale` Hz)
/// into `(epoch seconds, nano fraction)`. Floors, so pre-epoch values keep
/// a non-negative fraction.
pub(crate) fn split_scaled_epoch(
    value: i64,
    scale: i64,
) -> Result<(i64, i64), HailstoneError> {
    let factor = pow10(scale)?;
    let epoch = value.div_euclid(factor);
    let fraction = value.rem_euclid(factor) * pow10(9 - scale.min(9))?;
    Ok((epoch, fraction))
}

/// Whether a NULL element is admissible inside an ARRAY container, per the
/// caller's options; errors with the container name otherwise.
pub(crate) fn check_array_null(
    opts: &DecodeOptions,
    container: &str,
) -> Result<(), HailstoneError> {
    if opts.array_values_nullable {
        Ok(())
    } else {
        Err(HailstoneError::NullInContainer(container.to_string()))
    }
}

/// MAP-value counterpart of `check_array_null`.
pub(crate) fn check_map_null(
    opts: &DecodeOptions,
    container: &str,
) -> Result<(), HailstoneError> {
    if opts.map_values_nullable {
        Ok(())
    } else {
        Err(HailstoneError::NullInContainer(container.to_string()))
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn test_split_scaled_epoch() {
        // Millisecond-scaled value: 1500 ms.
        assert_eq!(split_scaled_epoch(1500, 3).unwrap(), (1, 500_000_000));
        // Scale 0 carries no fraction.
        assert_eq!(split_scaled_epoch(42, 0).unwrap(), (42, 0));
        // Pre-epoch values floor toward negative infinity.
        assert_eq!(split_scaled_epoch(-1, 3).unwrap(), (-1, 999_000_000));
    }

    #[test]
    fn test_pow10_rejects_wild_scales() {
        assert!(pow10(19).is_err());
        assert!(pow10(-1).is_err());
    }
}
