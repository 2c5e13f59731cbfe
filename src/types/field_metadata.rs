//! The recursive schema descriptor attached to every result column and
//! structured-type field.
//!
//! The server serializes these as JSON row-type entries; the same shape is
//! produced locally by the forward binder when it infers a schema for a
//! structured bind. `validate()` enforces the shape invariants the decoders
//! rely on.

use crate::error::HailstoneError;
use crate::types::TransportType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Recursive field metadata: transport type, nullability, numeric precision
/// and scale, and nested field descriptors.
///
/// For `ARRAY`, `fields` holds zero or one element descriptor (zero means
/// "semistructured, no schema"). For `MAP`, zero or exactly two (key then
/// value). For `OBJECT`, one per declared member. A top-level
/// `nullable = false` is advisory only; decoders always admit NULL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub precision: i64,
    #[serde(default)]
    pub scale: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMetadata>,
}

impl FieldMetadata {
    /// A nameless, nullable scalar descriptor of the given transport type.
    pub fn scalar(transport_type: TransportType) -> Self {
        Self {
            name: String::new(),
            transport_type,
            nullable: true,
            precision: 0,
            scale: 0,
            fields: Vec::new(),
        }
    }

    /// A `FIXED` descriptor with explicit precision and scale.
    pub fn fixed(precision: i64, scale: i64) -> Self {
        Self {
            precision,
            scale,
            ..Self::scalar(TransportType::Fixed)
        }
    }

    /// An `ARRAY` descriptor with a single element descriptor.
    pub fn array_of(element: FieldMetadata) -> Self {
        Self {
            fields: vec![element],
            ..Self::scalar(TransportType::Array)
        }
    }

    /// A `MAP` descriptor with key and value descriptors.
    pub fn map_of(key: FieldMetadata, value: FieldMetadata) -> Self {
        Self {
            fields: vec![key, value],
            ..Self::scalar(TransportType::Map)
        }
    }

    /// An `OBJECT` descriptor with named member descriptors.
    pub fn object_of(fields: Vec<FieldMetadata>) -> Self {
        Self {
            fields,
            ..Self::scalar(TransportType::Object)
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// The element descriptor of an `ARRAY`, when one is declared.
    pub fn element(&self) -> Option<&FieldMetadata> {
        match self.transport_type {
            TransportType::Array => self.fields.first(),
            _ => None,
        }
    }

    /// The key and value descriptors of a `MAP`, when declared.
    pub fn map_entries(&self) -> Option<(&FieldMetadata, &FieldMetadata)> {
        match (self.transport_type, self.fields.as_slice()) {
            (TransportType::Map, [key, value]) => Some((key, value)),
            _ => None,
        }
    }

    /// Checks the shape invariants for this descriptor and its children.
    pub fn validate(&self) -> Result<(), HailstoneError> {
        match self.transport_type {
            TransportType::Fixed => {
                if self.scale < 0 || self.precision < self.scale {
                    return Err(HailstoneError::SchemaMismatch(format!(
                        "FIXED requires 0 <= scale <= precision, got precision={} scale={}",
                        self.precision, self.scale
                    )));
                }
            }
            TransportType::Array => {
                if self.fields.len() > 1 {
                    return Err(HailstoneError::SchemaMismatch(format!(
                        "ARRAY admits at most one element descriptor, got {}",
                        self.fields.len()
                    )));
                }
            }
            TransportType::Map => {
                if !self.fields.is_empty() && self.fields.len() != 2 {
                    return Err(HailstoneError::SchemaMismatch(format!(
                        "MAP requires zero or two field descriptors, got {}",
                        self.fields.len()
                    )));
                }
                if let Some((key, _)) = self.map_entries() {
                    let key_ok = key.transport_type == TransportType::Text
                        || (key.transport_type == TransportType::Fixed && key.scale == 0);
                    if !key_ok {
                        return Err(HailstoneError::MapKeyTypeUnsupported(format!(
                            "{} (scale {})",
                            key.transport_type, key.scale
                        )));
                    }
                }
            }
            TransportType::Object => {
                let mut seen = HashSet::new();
                for field in &self.fields {
                    if field.name.is_empty() {
                        return Err(HailstoneError::SchemaMismatch(
                            "OBJECT member with empty name".to_string(),
                        ));
                    }
                    if !seen.insert(field.name.as_str()) {
                        return Err(HailstoneError::SchemaMismatch(format!(
                            "duplicate OBJECT member '{}'",
                            field.name
                        )));
                    }
                }
            }
            _ => {}
        }
        for field in &self.fields {
            field.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_type_json_deserializes() {
        // The shape the server sends for a MAP<TEXT, FIXED(38,2)> column.
        let json = r#"{
            "name": "PRICES",
            "type": "map",
            "nullable": true,
            "fields": [
                {"type": "text", "nullable": false},
                {"type": "fixed", "nullable": true, "precision": 38, "scale": 2}
            ]
        }"#;
        let meta: FieldMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.transport_type, TransportType::Map);
        let (key, value) = meta.map_entries().unwrap();
        assert_eq!(key.transport_type, TransportType::Text);
        assert_eq!(value.scale, 2);
        meta.validate().unwrap();
    }

    #[test]
    fn test_fixed_scale_precision_invariant() {
        let bad = FieldMetadata::fixed(2, 5);
        assert!(matches!(
            bad.validate(),
            Err(HailstoneError::SchemaMismatch(_))
        ));
        FieldMetadata::fixed(38, 0).validate().unwrap();
    }

    #[test]
    fn test_map_key_must_be_text_or_integer_fixed() {
        let bad = FieldMetadata::map_of(
            FieldMetadata::fixed(10, 2),
            FieldMetadata::scalar(TransportType::Text),
        );
        assert!(matches!(
            bad.validate(),
            Err(HailstoneError::MapKeyTypeUnsupported(_))
        ));

        let ok = FieldMetadata::map_of(
            FieldMetadata::fixed(10, 0),
            FieldMetadata::scalar(TransportType::Text),
        );
        ok.validate().unwrap();
    }

    #[test]
    fn test_object_member_names_unique_and_non_empty() {
        let dup = FieldMetadata::object_of(vec![
            FieldMetadata::scalar(TransportType::Text).with_name("a"),
            FieldMetadata::scalar(TransportType::Fixed).with_name("a"),
        ]);
        assert!(dup.validate().is_err());

        let anon =
            FieldMetadata::object_of(vec![FieldMetadata::scalar(TransportType::Text)]);
        assert!(anon.validate().is_err());
    }

    #[test]
    fn test_semistructured_array_has_no_element() {
        let semi = FieldMetadata::scalar(TransportType::Array);
        semi.validate().unwrap();
        assert!(semi.element().is_none());
    }
}
