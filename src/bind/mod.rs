//! The forward binder: host values in, wire literals out.
//!
//! Callers hand the binder a `HostValue` (the tagged boundary between host
//! types and transport types) plus a `BindMode` hint that disambiguates
//! cases where one host type admits several transport types (a datetime can
//! bind as DATE, TIME or any timestamp flavor; a string can pass through as
//! pre-encoded JSON). The binder picks the transport type, renders the
//! literal, and for structured binds attaches the inferred schema
//! descriptor.

pub mod array_bind;

use crate::error::HailstoneError;
use crate::params::SessionParams;
use crate::structured::{schema_of, writer_to_json, StructuredWriter, WriterContext};
use crate::timefmt;
use crate::types::{FieldMetadata, TransportType};
use crate::value::{MapKey, TZ_OFFSET_BIAS};
use chrono::{DateTime, FixedOffset, Timelike};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub use array_bind::array_bind;

//==================================================================================
// 1. The host-value boundary
//==================================================================================

/// A host value offered for binding. Scalar variants carry `Option` so the
/// nullable-wrapper host types map onto them directly; slice variants are
/// homogeneous columns for array binds; `Dynamic` is the legacy
/// runtime-typed heterogeneous slice.
pub enum HostValue {
    Null,
    Bool(Option<bool>),
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Bytes(Option<Vec<u8>>),
    Timestamp(Option<DateTime<FixedOffset>>),
    BoolSlice(Vec<Option<bool>>),
    IntSlice(Vec<Option<i64>>),
    FloatSlice(Vec<Option<f64>>),
    TextSlice(Vec<Option<String>>),
    BytesSlice(Vec<Option<Vec<u8>>>),
    TimestampSlice(Vec<Option<DateTime<FixedOffset>>>),
    /// Elements typed only at runtime; inspected one by one.
    Dynamic(Vec<HostValue>),
    Map(Vec<(MapKey, HostValue)>),
    Object(Box<dyn StructuredWriter>),
    /// A slice of structured writers with the element schema pinned, so an
    /// empty slice still binds with a full `ARRAY<OBJECT<...>>` descriptor.
    ObjectSlice {
        items: Vec<Box<dyn StructuredWriter>>,
        element: FieldMetadata,
    },
    /// A typed nested NULL: no payload, full schema.
    TypedNull(FieldMetadata),
}

impl HostValue {
    /// Wraps a structured writer for an OBJECT bind.
    pub fn writer<T: StructuredWriter + 'static>(value: T) -> Self {
        HostValue::Object(Box::new(value))
    }

    /// Wraps a slice of structured writers, probing `T::default()` for the
    /// element schema so empty slices keep their shape.
    pub fn writer_slice<T: StructuredWriter + Default + 'static>(
        items: Vec<T>,
        params: &SessionParams,
    ) -> Result<Self, HailstoneError> {
        let element = schema_of::<T>(params)?;
        let items = items
            .into_iter()
            .map(|v| Box::new(v) as Box<dyn StructuredWriter>)
            .collect();
        Ok(HostValue::ObjectSlice { items, element })
    }

    /// A typed OBJECT NULL for `T`, schema probed from `T::default()`.
    pub fn typed_null_of<T: StructuredWriter + Default>(
        params: &SessionParams,
    ) -> Result<Self, HailstoneError> {
        Ok(HostValue::TypedNull(schema_of::<T>(params)?))
    }
}

/// Caller intent attached to a bind. Disambiguates host types that admit
/// several transport types; `Auto` lets the host type decide alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    #[default]
    Auto,
    Binary,
    Date,
    Time,
    TimestampNtz,
    TimestampLtz,
    TimestampTz,
    /// Bind as a structured OBJECT (strings pass through as JSON).
    Object,
    /// Bind as a structured ARRAY (strings pass through as JSON).
    Array,
    /// Bind as a homogeneous column; see `array_bind`.
    Slice,
}

impl BindMode {
    /// The temporal transport type this mode selects, if any.
    pub(crate) fn temporal_kind(&self) -> Option<TransportType> {
        match self {
            BindMode::Date => Some(TransportType::Date),
            BindMode::Time => Some(TransportType::Time),
            BindMode::TimestampNtz => Some(TransportType::TimestampNtz),
            BindMode::TimestampLtz => Some(TransportType::TimestampLtz),
            BindMode::TimestampTz => Some(TransportType::TimestampTz),
            _ => None,
        }
    }

    fn is_structured(&self) -> bool {
        matches!(self, BindMode::Object | BindMode::Array | BindMode::Slice)
    }
}

/// How `BindingValue::value` is to be read by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingFormat {
    /// Plain literal in the per-type textual form.
    Empty,
    /// JSON payload (structured binds and typed JSON nulls).
    Json,
}

/// One bound parameter: literal (None = NULL), payload format, selected
/// transport type, and the inferred schema for structured binds.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingValue {
    pub value: Option<String>,
    pub format: BindingFormat,
    pub transport_type: TransportType,
    pub schema: Option<FieldMetadata>,
}

impl BindingValue {
    fn literal(value: String, transport_type: TransportType) -> Self {
        Self {
            value: Some(value),
            format: BindingFormat::Empty,
            transport_type,
            schema: None,
        }
    }

    fn null(transport_type: TransportType, format: BindingFormat) -> Self {
        Self {
            value: None,
            format,
            transport_type,
            schema: None,
        }
    }

    fn json(payload: &JsonValue, schema: FieldMetadata) -> Result<Self, HailstoneError> {
        Ok(Self {
            value: Some(serde_json::to_string(payload)?),
            format: BindingFormat::Json,
            transport_type: schema.transport_type,
            schema: Some(schema),
        })
    }
}

//==================================================================================
// 2. bind()
//==================================================================================

/// Binds one host value, selecting the transport type from the value and
/// the mode hint and rendering the wire literal.
pub fn bind(
    value: &HostValue,
    mode: BindMode,
    params: &SessionParams,
) -> Result<BindingValue, HailstoneError> {
    match value {
        HostValue::Null => {
            if mode.is_structured() {
                // Untyped nested NULL: JSON format, no schema to attach.
                Ok(BindingValue::null(
                    structured_type_of(mode),
                    BindingFormat::Json,
                ))
            } else {
                Ok(BindingValue::null(TransportType::Text, BindingFormat::Empty))
            }
        }
        HostValue::TypedNull(schema) => Ok(BindingValue {
            value: None,
            format: BindingFormat::Json,
            transport_type: schema.transport_type,
            schema: Some(schema.clone()),
        }),

        HostValue::Bool(None) => Ok(BindingValue::null(
            TransportType::Boolean,
            BindingFormat::Empty,
        )),
        HostValue::Bool(Some(b)) => Ok(BindingValue::literal(
            b.to_string(),
            TransportType::Boolean,
        )),

        HostValue::Int(None) => Ok(BindingValue::null(TransportType::Fixed, BindingFormat::Empty)),
        HostValue::Int(Some(i)) => {
            Ok(BindingValue::literal(i.to_string(), TransportType::Fixed))
        }

        HostValue::Float(None) => {
            Ok(BindingValue::null(TransportType::Real, BindingFormat::Empty))
        }
        HostValue::Float(Some(f)) => {
            Ok(BindingValue::literal(f.to_string(), TransportType::Real))
        }

        HostValue::Text(None) => {
            Ok(BindingValue::null(TransportType::Text, BindingFormat::Empty))
        }
        HostValue::Text(Some(s)) => {
            if mode.is_structured() {
                // Pre-encoded JSON passes through; the server validates it.
                Ok(BindingValue {
                    value: Some(s.clone()),
                    format: BindingFormat::Json,
                    transport_type: structured_type_of(mode),
                    schema: None,
                })
            } else {
                Ok(BindingValue::literal(s.clone(), TransportType::Text))
            }
        }

        HostValue::Bytes(None) => Ok(BindingValue::null(
            TransportType::Binary,
            BindingFormat::Empty,
        )),
        HostValue::Bytes(Some(b)) => match mode {
            BindMode::Binary => {
                Ok(BindingValue::literal(hex::encode(b), TransportType::Binary))
            }
            other => Err(HailstoneError::UnsupportedType(format!(
                "byte sequence requires BINARY mode, got {:?}",
                other
            ))),
        },

        HostValue::Timestamp(None) => {
            let kind = mode.temporal_kind().unwrap_or(TransportType::TimestampNtz);
            Ok(BindingValue::null(kind, BindingFormat::Empty))
        }
        HostValue::Timestamp(Some(t)) => {
            let kind = mode.temporal_kind().ok_or_else(|| {
                HailstoneError::UnsupportedType(format!(
                    "datetime requires a temporal mode, got {:?}",
                    mode
                ))
            })?;
            Ok(BindingValue::literal(temporal_literal(t, kind), kind))
        }

        // Everything below is a structured bind: one JSON payload plus an
        // inferred schema descriptor.
        HostValue::BoolSlice(_)
        | HostValue::IntSlice(_)
        | HostValue::FloatSlice(_)
        | HostValue::TextSlice(_)
        | HostValue::BytesSlice(_)
        | HostValue::TimestampSlice(_)
        | HostValue::Dynamic(_)
        | HostValue::Map(_)
        | HostValue::Object(_)
        | HostValue::ObjectSlice { .. } => {
            let (payload, schema) = json_and_schema(value, mode, params)?;
            BindingValue::json(&payload, schema)
        }
    }
}

fn structured_type_of(mode: BindMode) -> TransportType {
    match mode {
        BindMode::Object => TransportType::Object,
        _ => TransportType::Array,
    }
}

//==================================================================================
// 3. Temporal literals
//==================================================================================

const NANOS_PER_SEC: i128 = 1_000_000_000;
const SECS_PER_DAY: i64 = 86_400;

/// Renders a datetime as the wire literal for `kind`. Used by both the
/// scalar bind path and the array binder.
pub(crate) fn temporal_literal(t: &DateTime<FixedOffset>, kind: TransportType) -> String {
    match kind {
        // Day-truncated, UTC-shifted epoch milliseconds.
        TransportType::Date => {
            let shifted = t.timestamp() + i64::from(t.offset().local_minus_utc());
            let days = shifted.div_euclid(SECS_PER_DAY);
            (days * SECS_PER_DAY * 1000).to_string()
        }
        // Nanoseconds since local midnight.
        TransportType::Time => {
            let wall = t.time();
            let nanos = i64::from(wall.num_seconds_from_midnight()) * 1_000_000_000
                + i64::from(wall.nanosecond());
            nanos.to_string()
        }
        TransportType::TimestampTz => {
            let offset_token =
                i64::from(t.offset().local_minus_utc()) / 60 + TZ_OFFSET_BIAS;
            format!("{} {}", epoch_nanos(t), offset_token)
        }
        // NTZ and LTZ both travel as plain epoch nanoseconds.
        _ => epoch_nanos(t).to_string(),
    }
}

fn epoch_nanos(t: &DateTime<FixedOffset>) -> i128 {
    t.timestamp() as i128 * NANOS_PER_SEC + i128::from(t.timestamp_subsec_nanos())
}

//==================================================================================
// 4. JSON payload + schema inference for structured binds
//==================================================================================

/// Renders a host value into a JSON payload and its inferred schema
/// descriptor. Shared by `bind` and the structured-writer raw setters.
pub(crate) fn json_and_schema(
    value: &HostValue,
    mode: BindMode,
    params: &SessionParams,
) -> Result<(JsonValue, FieldMetadata), HailstoneError> {
    match value {
        HostValue::BoolSlice(items) => Ok((
            items.iter().map(|v| JsonValue::from(*v)).collect(),
            FieldMetadata::array_of(FieldMetadata::scalar(TransportType::Boolean)),
        )),
        HostValue::IntSlice(items) => Ok((
            items.iter().map(|v| JsonValue::from(*v)).collect(),
            FieldMetadata::array_of(FieldMetadata::fixed(38, 0)),
        )),
        HostValue::FloatSlice(items) => Ok((
            items.iter().map(|v| JsonValue::from(*v)).collect(),
            FieldMetadata::array_of(FieldMetadata::scalar(TransportType::Real)),
        )),
        HostValue::TextSlice(items) => Ok((
            items.iter().map(|v| JsonValue::from(v.clone())).collect(),
            FieldMetadata::array_of(FieldMetadata::scalar(TransportType::Text)),
        )),
        // Bytes travel as hex strings inside JSON; an empty slice still
        // binds as "[]" under an ARRAY<BINARY> descriptor.
        HostValue::BytesSlice(items) => Ok((
            items
                .iter()
                .map(|v| match v {
                    Some(b) => JsonValue::String(hex::encode(b)),
                    None => JsonValue::Null,
                })
                .collect(),
            FieldMetadata::array_of(FieldMetadata::scalar(TransportType::Binary)),
        )),
        HostValue::TimestampSlice(items) => {
            let kind = mode.temporal_kind().unwrap_or(TransportType::TimestampNtz);
            let rendered = items
                .iter()
                .map(|v| match v {
                    Some(t) => timefmt::format_structured_datetime(kind, t, params)
                        .map(JsonValue::String),
                    None => Ok(JsonValue::Null),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut element = FieldMetadata::scalar(kind);
            element.scale = 9;
            Ok((JsonValue::Array(rendered), FieldMetadata::array_of(element)))
        }
        HostValue::Dynamic(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            let mut element: Option<FieldMetadata> = None;
            for item in items {
                match item {
                    HostValue::Dynamic(_)
                    | HostValue::BoolSlice(_)
                    | HostValue::IntSlice(_)
                    | HostValue::FloatSlice(_)
                    | HostValue::TextSlice(_)
                    | HostValue::BytesSlice(_)
                    | HostValue::TimestampSlice(_)
                    | HostValue::ObjectSlice { .. } => {
                        return Err(HailstoneError::UnsupportedType(
                            "a slice of slices cannot be bound".to_string(),
                        ));
                    }
                    HostValue::Null | HostValue::TypedNull(_) => {
                        rendered.push(JsonValue::Null);
                    }
                    other => {
                        let (json, schema) = scalar_json(other, mode, params)?;
                        rendered.push(json);
                        element.get_or_insert(schema);
                    }
                }
            }
            let element =
                element.unwrap_or_else(|| FieldMetadata::scalar(TransportType::Text));
            Ok((JsonValue::Array(rendered), FieldMetadata::array_of(element)))
        }
        HostValue::Map(entries) => {
            let mut out = JsonMap::new();
            let mut key_schema: Option<FieldMetadata> = None;
            let mut value_schema: Option<FieldMetadata> = None;
            for (key, v) in entries {
                let k = match key {
                    MapKey::Text(s) => {
                        key_schema
                            .get_or_insert_with(|| FieldMetadata::scalar(TransportType::Text));
                        s.clone()
                    }
                    MapKey::Int(i) => {
                        key_schema.get_or_insert_with(|| FieldMetadata::fixed(38, 0));
                        i.to_string()
                    }
                };
                let (json, schema) = match v {
                    HostValue::Null | HostValue::TypedNull(_) => {
                        (JsonValue::Null, None)
                    }
                    other => {
                        let (json, schema) = scalar_json(other, mode, params)?;
                        (json, Some(schema))
                    }
                };
                if let Some(schema) = schema {
                    value_schema.get_or_insert(schema);
                }
                out.insert(k, json);
            }
            let key = key_schema
                .unwrap_or_else(|| FieldMetadata::scalar(TransportType::Text));
            let value = value_schema
                .unwrap_or_else(|| FieldMetadata::scalar(TransportType::Text));
            Ok((JsonValue::Object(out), FieldMetadata::map_of(key, value)))
        }
        HostValue::Object(writer) => writer_to_json(writer.as_ref(), params),
        HostValue::ObjectSlice { items, element } => {
            let rendered = items
                .iter()
                .map(|w| writer_to_json(w.as_ref(), params).map(|(json, _)| json))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((
                JsonValue::Array(rendered),
                FieldMetadata::array_of(element.clone()),
            ))
        }
        other => scalar_json(other, mode, params),
    }
}

/// A scalar host value as a JSON element, with its scalar descriptor.
fn scalar_json(
    value: &HostValue,
    mode: BindMode,
    params: &SessionParams,
) -> Result<(JsonValue, FieldMetadata), HailstoneError> {
    match value {
        HostValue::Bool(v) => Ok((
            JsonValue::from(*v),
            FieldMetadata::scalar(TransportType::Boolean),
        )),
        HostValue::Int(v) => Ok((JsonValue::from(*v), FieldMetadata::fixed(38, 0))),
        HostValue::Float(v) => Ok((
            JsonValue::from(*v),
            FieldMetadata::scalar(TransportType::Real),
        )),
        HostValue::Text(v) => Ok((
            JsonValue::from(v.clone()),
            FieldMetadata::scalar(TransportType::Text),
        )),
        HostValue::Bytes(v) => Ok((
            match v {
                Some(b) => JsonValue::String(hex::encode(b)),
                None => JsonValue::Null,
            },
            FieldMetadata::scalar(TransportType::Binary),
        )),
        HostValue::Timestamp(v) => {
            let kind = mode.temporal_kind().unwrap_or(TransportType::TimestampNtz);
            let json = match v {
                Some(t) => JsonValue::String(timefmt::format_structured_datetime(
                    kind, t, params,
                )?),
                None => JsonValue::Null,
            };
            let mut element = FieldMetadata::scalar(kind);
            element.scale = 9;
            Ok((json, element))
        }
        HostValue::Object(writer) => writer_to_json(writer.as_ref(), params),
        other => Err(HailstoneError::UnsupportedType(format!(
            "{} cannot appear as a nested element",
            host_kind(other)
        ))),
    }
}

fn host_kind(value: &HostValue) -> &'static str {
    match value {
        HostValue::Null => "null",
        HostValue::Bool(_) => "bool",
        HostValue::Int(_) => "int",
        HostValue::Float(_) => "float",
        HostValue::Text(_) => "text",
        HostValue::Bytes(_) => "bytes",
        HostValue::Timestamp(_) => "timestamp",
        HostValue::BoolSlice(_)
        | HostValue::IntSlice(_)
        | HostValue::FloatSlice(_)
        | HostValue::TextSlice(_)
        | HostValue::BytesSlice(_)
        | HostValue::TimestampSlice(_) => "slice",
        HostValue::Dynamic(_) => "dynamic slice",
        HostValue::Map(_) => "map",
        HostValue::Object(_) => "structured writer",
        HostValue::ObjectSlice { .. } => "writer slice",
        HostValue::TypedNull(_) => "typed null",
    }
}

//==================================================================================
// 5. Container setters for the writer context
//==================================================================================

impl WriterContext<'_> {
    /// Writes a slice-valued field; payload and ARRAY schema are inferred
    /// from the host value.
    pub fn write_array(
        &mut self,
        name: &str,
        value: &HostValue,
        mode: BindMode,
        params: &SessionParams,
    ) -> Result<(), HailstoneError> {
        let (json, schema) = json_and_schema(value, mode, params)?;
        if schema.transport_type != TransportType::Array {
            return Err(HailstoneError::UnsupportedType(format!(
                "field '{}': expected a slice value, got {}",
                name,
                host_kind(value)
            )));
        }
        self.write_raw(name, json, schema)
    }

    /// Writes a map-valued field; payload and MAP schema are inferred.
    pub fn write_map(
        &mut self,
        name: &str,
        value: &HostValue,
        mode: BindMode,
        params: &SessionParams,
    ) -> Result<(), HailstoneError> {
        let (json, schema) = json_and_schema(value, mode, params)?;
        if schema.transport_type != TransportType::Map {
            return Err(HailstoneError::UnsupportedType(format!(
                "field '{}': expected a map value, got {}",
                name,
                host_kind(value)
            )));
        }
        self.write_raw(name, json, schema)
    }
}
