//! This module defines the single, unified error type for the entire hailstone core.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HailstoneError {
    // =========================================================================
    // === High-Level, Semantic Errors (Specific to our library's logic)
    // =========================================================================
    /// A host value has no transport mapping (bind path), or a descriptor has
    /// no host mapping (decode path).
    #[error("Unsupported type for this operation: {0}")]
    UnsupportedType(String),

    #[error("Invalid TIMESTAMP_TZ value, expected \"<epoch-nanos> <offset-token>\": {0}")]
    InvalidTimestampTz(String),

    #[error("Invalid hex in BINARY value: {0}")]
    InvalidBinaryHex(String),

    #[error("Incorrect seconds-fraction token in format string: {0}")]
    IncorrectSecondsFraction(String),

    #[error("No known datetime format for kind: {0}")]
    NoKnownFormat(String),

    #[error("Column '{column}' cannot be represented at nanosecond precision")]
    TooHighTimestampPrecision { column: String },

    /// A NULL element was decoded into a container whose values were declared
    /// non-nullable by the caller's options.
    #[error("NULL value in a non-nullable container (field '{0}')")]
    NullInContainer(String),

    #[error("Structured field not found: {0}")]
    FieldMissing(String),

    #[error("Structured field '{field}' has wrong type: expected {expected}, got {actual}")]
    WrongType {
        field: String,
        expected: &'static str,
        actual: String,
    },

    #[error("Map key type must be TEXT or FIXED with scale 0, got {0}")]
    MapKeyTypeUnsupported(String),

    /// Shape mismatch between a schema descriptor and the actual physical layout.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Number parse failure: {0}")]
    NumberParse(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error from the Serde JSON library, typically while decoding a
    /// structured (OBJECT/ARRAY/MAP) payload.
    #[error("JSON parse failure: {0}")]
    JsonParse(#[from] serde_json::Error),
}

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<hex::FromHexError> for HailstoneError {
    fn from(err: hex::FromHexError) -> Self {
        HailstoneError::InvalidBinaryHex(err.to_string())
    }
}

impl From<std::num::ParseIntError> for HailstoneError {
    fn from(err: std::num::ParseIntError) -> Self {
        HailstoneError::NumberParse(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for HailstoneError {
    fn from(err: std::num::ParseFloatError) -> Self {
        HailstoneError::NumberParse(err.to_string())
    }
}
