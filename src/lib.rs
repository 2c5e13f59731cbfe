//! This file is the root of the `hailstone_core` Rust crate.
//!
//! hailstone-core is the value-conversion and result-decoding core of the
//! Hailstone warehouse driver. It is a pure CPU library: the SQL facade,
//! transport, authentication and chunk downloading live elsewhere and call
//! into this crate with schema descriptors, raw cells and arrow batches.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod bind;
pub mod config;
pub mod decode;
pub mod error;
pub mod observability;
pub mod params;
pub mod structured;
pub mod timefmt;
pub mod types;
pub mod value;

//==================================================================================
// 2. Re-exports (the facade-facing surface)
//==================================================================================
pub use bind::{array_bind, bind, BindMode, BindingFormat, BindingValue, HostValue};
pub use config::{DecodeOptions, TimestampUnit, Utf8Policy};
pub use decode::{decode_columnar, decode_text, rewrite_record};
pub use error::HailstoneError;
pub use params::SessionParams;
pub use structured::{StructuredValue, StructuredWriter, WriterContext};
pub use types::{FieldMetadata, TransportType};
pub use value::{MapKey, Value};
