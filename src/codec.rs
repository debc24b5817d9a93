//! Request/response body codecs.
//!
//! A [`Codec`] turns a structured value into body bytes and back. Values move
//! through [`serde_json::Value`] so codecs stay object safe and can be swapped
//! per client or per call as `Arc<dyn Codec>`.

use crate::{Error, Result};
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Media type sent with JSON bodies.
pub const APPLICATION_JSON: &str = "application/json";

/// How object keys are matched against struct field names when decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldMatching {
    /// Keys must equal field names exactly.
    #[default]
    Exact,
    /// Keys match field names ignoring ASCII case.
    CaseInsensitive,
}

/// Converts between structured values and body bytes.
pub trait Codec: Send + Sync + fmt::Debug {
    /// The `Content-Type` to send with encoded bodies.
    fn media_type(&self) -> &str {
        APPLICATION_JSON
    }

    /// Encodes a value into body bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Parses body bytes into a value.
    fn decode(&self, body: &[u8]) -> Result<Value>;

    /// Field matching applied when a decoded value is turned into a type.
    fn field_matching(&self) -> FieldMatching {
        FieldMatching::Exact
    }
}

/// The default JSON codec.
///
/// # Examples
///
/// ```
/// use smarthttp::codec::{decode_str, JsonCodec};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Status {
///     status: String,
/// }
///
/// let codec = JsonCodec::case_insensitive();
/// let parsed: Status = decode_str(&codec, r#"{"Status":"ready"}"#).unwrap();
/// assert_eq!(parsed.status, "ready");
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    field_matching: FieldMatching,
}

impl JsonCodec {
    /// Creates a codec with exact field matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec that matches fields ignoring ASCII case.
    pub fn case_insensitive() -> Self {
        Self {
            field_matching: FieldMatching::CaseInsensitive,
        }
    }

    /// Sets the field matching mode.
    pub fn with_field_matching(mut self, field_matching: FieldMatching) -> Self {
        self.field_matching = field_matching;
        self
    }
}

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(&self, body: &[u8]) -> Result<Value> {
        serde_json::from_slice(body).map_err(|e| Error::Deserialization {
            raw_response: String::from_utf8_lossy(body).into_owned(),
            serde_error: e.to_string(),
        })
    }

    fn field_matching(&self) -> FieldMatching {
        self.field_matching
    }
}

/// Converts a value into the codec's intermediate form.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Serializes `value` into body bytes with `codec`.
pub fn encode<T: Serialize + ?Sized>(codec: &dyn Codec, value: &T) -> Result<Vec<u8>> {
    codec.encode(&to_value(value)?)
}

/// Decodes body bytes into `T` with `codec`.
pub fn decode<T: DeserializeOwned>(codec: &dyn Codec, body: &[u8]) -> Result<T> {
    from_value(codec, codec.decode(body)?, body)
}

/// Turns a value already parsed by `codec` into `T`, applying the codec's
/// field matching. `body` is only used for error reporting.
pub fn from_value<T: DeserializeOwned>(codec: &dyn Codec, value: Value, body: &[u8]) -> Result<T> {
    let result = match codec.field_matching() {
        FieldMatching::Exact => serde_json::from_value(value),
        FieldMatching::CaseInsensitive => T::deserialize(CaseInsensitive(value)),
    };
    result.map_err(|e| {
        let raw_response = String::from_utf8_lossy(body).into_owned();
        tracing::error!(error = %e, raw_response = %raw_response, "Failed to deserialize body");
        Error::Deserialization {
            raw_response,
            serde_error: e.to_string(),
        }
    })
}

/// Decodes a string body into `T` with `codec`.
pub fn decode_str<T: DeserializeOwned>(codec: &dyn Codec, body: &str) -> Result<T> {
    decode(codec, body.as_bytes())
}

/// Deserializer over a JSON value that renames object keys to the target
/// struct's field names when they differ only in ASCII case.
struct CaseInsensitive(Value);

impl CaseInsensitive {
    fn visit_object<'de, V>(object: Map<String, Value>, visitor: V) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let mut map: MapDeserializer<'de, _, serde_json::Error> = MapDeserializer::new(
            object
                .into_iter()
                .map(|(key, value)| (key, CaseInsensitive(value))),
        );
        let value = visitor.visit_map(&mut map)?;
        map.end()?;
        Ok(value)
    }
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for CaseInsensitive {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> Deserializer<'de> for CaseInsensitive {
    type Error = serde_json::Error;

    fn deserialize_any<V>(self, visitor: V) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Object(object) => Self::visit_object(object, visitor),
            Value::Array(items) => {
                let mut seq: SeqDeserializer<_, serde_json::Error> =
                    SeqDeserializer::new(items.into_iter().map(CaseInsensitive));
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Object(object) => {
                let renamed = object
                    .into_iter()
                    .map(|(key, value)| (canonical_field(key, fields), value))
                    .collect();
                Self::visit_object(renamed, visitor)
            }
            other => CaseInsensitive(other).deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> serde_json::Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.0.deserialize_enum(name, variants, visitor)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier
        ignored_any
    }
}

fn canonical_field(key: String, fields: &'static [&'static str]) -> String {
    if fields.contains(&key.as_str()) {
        return key;
    }
    match fields.iter().find(|field| field.eq_ignore_ascii_case(&key)) {
        Some(field) => (*field).to_string(),
        None => key,
    }
}
