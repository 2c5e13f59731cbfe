//! The structured-type protocol: how caller types are written into
//! schema-bearing nested JSON on the bind path, and how decoded OBJECT
//! values are read back out.
//!
//! On the write side, a caller implements `StructuredWriter` against a
//! `WriterContext` owned by this crate. The context exposes typed setters by
//! field name and records, per field, the inferred transport type and nested
//! schema; the binder then uses the ordered entry list as the OBJECT
//! descriptor fields.
//!
//! On the read side, `StructuredValue` offers typed getters by field name
//! and a serde bridge (`scan_to`) for filling caller structs in one step.

use crate::error::HailstoneError;
use crate::params::SessionParams;
use crate::timefmt;
use crate::types::{FieldMetadata, TransportType};
use crate::value::{MapKey, Value};
use chrono::{DateTime, FixedOffset};
use num_bigint::BigInt;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

//==================================================================================
// 1. Writer protocol
//==================================================================================

/// Implemented by caller types that bind as OBJECT values.
pub trait StructuredWriter {
    fn write(&self, ctx: &mut WriterContext<'_>) -> Result<(), HailstoneError>;
}

/// The context a `StructuredWriter` writes its fields into. Field order is
/// preserved; each setter records the field's inferred schema alongside its
/// JSON value.
pub struct WriterContext<'a> {
    values: JsonMap<String, JsonValue>,
    entries: Vec<FieldMetadata>,
    params: &'a SessionParams,
}

/// Maximum TEXT length the server admits; advertised on inferred text fields.
const MAX_TEXT_PRECISION: i64 = 134_217_728;

impl<'a> WriterContext<'a> {
    pub(crate) fn new(params: &'a SessionParams) -> Self {
        Self {
            values: JsonMap::new(),
            entries: Vec::new(),
            params,
        }
    }

    fn push(
        &mut self,
        name: &str,
        value: JsonValue,
        mut entry: FieldMetadata,
    ) -> Result<(), HailstoneError> {
        entry.name = name.to_string();
        self.values.insert(name.to_string(), value);
        self.entries.push(entry);
        Ok(())
    }

    pub fn write_string(&mut self, name: &str, value: &str) -> Result<(), HailstoneError> {
        self.write_nullable_string(name, Some(value))
    }

    pub fn write_nullable_string(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), HailstoneError> {
        let json = value.map(|v| JsonValue::String(v.to_string())).unwrap_or(JsonValue::Null);
        let mut entry = FieldMetadata::scalar(TransportType::Text);
        entry.precision = MAX_TEXT_PRECISION;
        self.push(name, json, entry)
    }

    pub fn write_i64(&mut self, name: &str, value: i64) -> Result<(), HailstoneError> {
        self.write_nullable_i64(name, Some(value))
    }

    pub fn write_nullable_i64(
        &mut self,
        name: &str,
        value: Option<i64>,
    ) -> Result<(), HailstoneError> {
        let json = value.map(JsonValue::from).unwrap_or(JsonValue::Null);
        self.push(name, json, FieldMetadata::fixed(38, 0))
    }

    pub fn write_f64(&mut self, name: &str, value: f64) -> Result<(), HailstoneError> {
        self.write_nullable_f64(name, Some(value))
    }

    pub fn write_nullable_f64(
        &mut self,
        name: &str,
        value: Option<f64>,
    ) -> Result<(), HailstoneError> {
        let json = value
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
        self.push(name, json, FieldMetadata::scalar(TransportType::Real))
    }

    pub fn write_bool(&mut self, name: &str, value: bool) -> Result<(), HailstoneError> {
        self.write_nullable_bool(name, Some(value))
    }

    pub fn write_nullable_bool(
        &mut self,
        name: &str,
        value: Option<bool>,
    ) -> Result<(), HailstoneError> {
        let json = value.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
        self.push(name, json, FieldMetadata::scalar(TransportType::Boolean))
    }

    /// Bytes travel as lowercase hex inside the JSON payload.
    pub fn write_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), HailstoneError> {
        self.write_nullable_bytes(name, Some(value))
    }

    pub fn write_nullable_bytes(
        &mut self,
        name: &str,
        value: Option<&[u8]>,
    ) -> Result<(), HailstoneError> {
        let json = value
            .map(|v| JsonValue::String(hex::encode(v)))
            .unwrap_or(JsonValue::Null);
        self.push(name, json, FieldMetadata::scalar(TransportType::Binary))
    }

    /// Writes a temporal field. `kind` selects one of DATE, TIME or the
    /// three timestamp flavors; the value is rendered with the session's
    /// input format for that kind.
    pub fn write_timestamp(
        &mut self,
        name: &str,
        value: &DateTime<FixedOffset>,
        kind: TransportType,
    ) -> Result<(), HailstoneError> {
        self.write_nullable_timestamp(name, Some(value), kind)
    }

    pub fn write_nullable_timestamp(
        &mut self,
        name: &str,
        value: Option<&DateTime<FixedOffset>>,
        kind: TransportType,
    ) -> Result<(), HailstoneError> {
        if !kind.is_temporal() {
            return Err(HailstoneError::UnsupportedType(format!(
                "field '{}': {} is not a temporal kind",
                name, kind
            )));
        }
        let json = match value {
            Some(v) => JsonValue::String(timefmt::format_structured_datetime(
                kind,
                v,
                self.params,
            )?),
            None => JsonValue::Null,
        };
        let mut entry = FieldMetadata::scalar(kind);
        entry.scale = 9;
        self.push(name, json, entry)
    }

    /// Writes a nested structured field by running its writer in a child
    /// context.
    pub fn write_struct(
        &mut self,
        name: &str,
        value: &dyn StructuredWriter,
    ) -> Result<(), HailstoneError> {
        let mut child = WriterContext::new(self.params);
        value.write(&mut child)?;
        let entry = FieldMetadata::object_of(child.entries);
        self.push(name, JsonValue::Object(child.values), entry)
    }

    /// Writes a nested structured field that may be absent. The schema is
    /// still inferred, by probing `T::default()`.
    pub fn write_nullable_struct<T: StructuredWriter + Default>(
        &mut self,
        name: &str,
        value: Option<&T>,
    ) -> Result<(), HailstoneError> {
        match value {
            Some(v) => self.write_struct(name, v),
            None => {
                let entry = schema_of::<T>(self.params)?;
                self.push(name, JsonValue::Null, entry)
            }
        }
    }

    /// Writes a pre-shaped nested value (array or map) with an explicit
    /// payload and schema. Used by the binder for slice and map fields.
    pub(crate) fn write_raw(
        &mut self,
        name: &str,
        json: JsonValue,
        entry: FieldMetadata,
    ) -> Result<(), HailstoneError> {
        if !entry.transport_type.is_structured() {
            return Err(HailstoneError::UnsupportedType(format!(
                "field '{}': raw writes are for ARRAY/MAP/OBJECT, got {}",
                name, entry.transport_type
            )));
        }
        self.push(name, json, entry)
    }

    pub(crate) fn into_parts(self) -> (JsonMap<String, JsonValue>, Vec<FieldMetadata>) {
        (self.values, self.entries)
    }
}

/// Runs `writer` and returns its JSON payload plus inferred OBJECT schema.
pub(crate) fn writer_to_json(
    writer: &dyn StructuredWriter,
    params: &SessionParams,
) -> Result<(JsonValue, FieldMetadata), HailstoneError> {
    let mut ctx = WriterContext::new(params);
    writer.write(&mut ctx)?;
    let (values, entries) = ctx.into_parts();
    Ok((JsonValue::Object(values), FieldMetadata::object_of(entries)))
}

/// Infers the OBJECT schema for a writer type by probing a default instance.
/// This is how nil writer slices and typed OBJECT nulls get their schema.
pub fn schema_of<T: StructuredWriter + Default>(
    params: &SessionParams,
) -> Result<FieldMetadata, HailstoneError> {
    let (_, schema) = writer_to_json(&T::default(), params)?;
    Ok(schema)
}

//==================================================================================
// 2. Reader protocol
//==================================================================================

/// A decoded OBJECT value with navigable, typed accessors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredValue {
    values: HashMap<String, Value>,
    metadata: Vec<FieldMetadata>,
}

impl StructuredValue {
    pub(crate) fn new(metadata: Vec<FieldMetadata>) -> Self {
        Self {
            values: HashMap::new(),
            metadata,
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// The field descriptors, in declaration order.
    pub fn metadata(&self) -> &[FieldMetadata] {
        &self.metadata
    }

    /// The raw dynamic value of a field.
    pub fn get_raw(&self, name: &str) -> Result<&Value, HailstoneError> {
        self.values
            .get(name)
            .ok_or_else(|| HailstoneError::FieldMissing(name.to_string()))
    }

    fn wrong_type(
        name: &str,
        expected: &'static str,
        actual: &Value,
    ) -> HailstoneError {
        HailstoneError::WrongType {
            field: name.to_string(),
            expected,
            actual: actual.type_name().to_string(),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, HailstoneError> {
        match self.get_raw(name)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(Self::wrong_type(name, "string", other)),
        }
    }

    pub fn get_opt_string(&self, name: &str) -> Result<Option<String>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Null => Ok(None),
            Value::Str(s) => Ok(Some(s.clone())),
            other => Err(Self::wrong_type(name, "string", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, HailstoneError> {
        match self.get_raw(name)? {
            Value::Int(i) => Ok(*i),
            other => Err(Self::wrong_type(name, "i64", other)),
        }
    }

    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            other => Err(Self::wrong_type(name, "i64", other)),
        }
    }

    pub fn get_bigint(&self, name: &str) -> Result<BigInt, HailstoneError> {
        match self.get_raw(name)? {
            Value::BigInt(i) => Ok(i.clone()),
            Value::Int(i) => Ok(BigInt::from(*i)),
            other => Err(Self::wrong_type(name, "bigint", other)),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, HailstoneError> {
        match self.get_raw(name)? {
            Value::Float(f) => Ok(*f),
            other => Err(Self::wrong_type(name, "f64", other)),
        }
    }

    pub fn get_opt_f64(&self, name: &str) -> Result<Option<f64>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Null => Ok(None),
            Value::Float(f) => Ok(Some(*f)),
            other => Err(Self::wrong_type(name, "f64", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, HailstoneError> {
        match self.get_raw(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::wrong_type(name, "bool", other)),
        }
    }

    pub fn get_opt_bool(&self, name: &str) -> Result<Option<bool>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(Self::wrong_type(name, "bool", other)),
        }
    }

    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(Self::wrong_type(name, "bytes", other)),
        }
    }

    pub fn get_timestamp(&self, name: &str) -> Result<DateTime<FixedOffset>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Timestamp(t) => Ok(*t),
            other => Err(Self::wrong_type(name, "timestamp", other)),
        }
    }

    pub fn get_opt_timestamp(
        &self,
        name: &str,
    ) -> Result<Option<DateTime<FixedOffset>>, HailstoneError> {
        match self.get_raw(name)? {
            Value::Null => Ok(None),
            Value::Timestamp(t) => Ok(Some(*t)),
            other => Err(Self::wrong_type(name, "timestamp", other)),
        }
    }

    pub fn get_struct(&self, name: &str) -> Result<&StructuredValue, HailstoneError> {
        match self.get_raw(name)? {
            Value::Object(o) => Ok(o),
            other => Err(Self::wrong_type(name, "object", other)),
        }
    }

    pub fn get_array(&self, name: &str) -> Result<&[Value], HailstoneError> {
        match self.get_raw(name)? {
            Value::Array(a) => Ok(a),
            other => Err(Self::wrong_type(name, "array", other)),
        }
    }

    pub fn get_map(&self, name: &str) -> Result<&[(MapKey, Value)], HailstoneError> {
        match self.get_raw(name)? {
            Value::Map(m) => Ok(m),
            other => Err(Self::wrong_type(name, "map", other)),
        }
    }

    /// Renders this value as plain JSON: timestamps as RFC3339 strings,
    /// bytes as number arrays, map keys as strings. Fields appear in
    /// declaration order where metadata is available.
    pub fn to_json(&self) -> JsonValue {
        let mut out = JsonMap::new();
        let mut emitted: Vec<&str> = Vec::new();
        for field in &self.metadata {
            if let Some(value) = self.values.get(&field.name) {
                out.insert(field.name.clone(), value_to_json(value));
                emitted.push(field.name.as_str());
            }
        }
        // Anything decoded without a matching descriptor still shows up.
        for (name, value) in &self.values {
            if !emitted.contains(&name.as_str()) {
                out.insert(name.clone(), value_to_json(value));
            }
        }
        JsonValue::Object(out)
    }

    /// Fills a caller struct through serde. The convenience counterpart of
    /// the per-field getters.
    pub fn scan_to<T: DeserializeOwned>(&self) -> Result<T, HailstoneError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

/// Dynamic value → plain JSON, used by the serde reader bridge.
pub(crate) fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::BigInt(i) => number_or_string(&i.to_string()),
        Value::BigDecimal(d) => number_or_string(&d.to_string()),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
        Value::Timestamp(t) => JsonValue::String(t.to_rfc3339()),
        Value::Array(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let mut out = JsonMap::new();
            for (key, v) in entries {
                out.insert(key.to_string(), value_to_json(v));
            }
            JsonValue::Object(out)
        }
        Value::Object(o) => o.to_json(),
    }
}

/// Keeps unbounded numerics numeric when serde_json can represent them.
fn number_or_string(text: &str) -> JsonValue {
    serde_json::from_str::<serde_json::Number>(text)
        .map(JsonValue::Number)
        .unwrap_or_else(|_| JsonValue::String(text.to_string()))
}
