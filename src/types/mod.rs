//! This module defines the core, strongly-typed data representations used
//! throughout the hailstone conversion paths.
//!
//! It includes the canonical `TransportType` enum (the warehouse's abstract
//! type tags) and the recursive `FieldMetadata` schema descriptor that the
//! server attaches to every result column and structured-type field.

pub mod field_metadata;
pub mod transport_type;

// Re-export the main types for easier access.
pub use field_metadata::FieldMetadata;
pub use transport_type::TransportType;
