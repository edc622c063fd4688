//! In-memory field values and their storage/wire conversions.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::error::{ErrorKind, ValidationError};
use crate::model::Instance;

/// A single field value as held by an [`Instance`].
///
/// Values arrive from callers, storage, or the wire in loosely typed form and
/// are coerced into the field's natural variant by validation and
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Missing value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Timestamp in UTC.
    DateTime(DateTime<Utc>),
    /// Calendar date.
    Date(NaiveDate),
    /// Wall-clock time.
    Time(NaiveTime),
    /// Document identity.
    ObjectId(ObjectId),
    /// Ordered list.
    Array(Vec<Value>),
    /// Ordered string-keyed map.
    Map(IndexMap<String, Value>),
    /// A resolved related instance.
    Instance(Box<Instance>),
}

impl Value {
    /// Returns whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number as `f64`, if this is numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the object id, if this is one.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Self::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Returns the related instance, if this is one.
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Returns the items, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries, if this is a map.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns a short name of the variant, used in messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::ObjectId(_) => "object id",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Instance(_) => "instance",
        }
    }

    /// Converts a stored BSON value without any field-specific coercion.
    pub fn from_bson(value: Bson) -> Self {
        match value {
            Bson::Null | Bson::Undefined => Self::Null,
            Bson::Boolean(b) => Self::Bool(b),
            Bson::Int32(i) => Self::Int(i64::from(i)),
            Bson::Int64(i) => Self::Int(i),
            Bson::Double(f) => Self::Float(f),
            Bson::String(s) => Self::String(s),
            Bson::DateTime(dt) => Self::DateTime(dt.to_chrono()),
            Bson::ObjectId(oid) => Self::ObjectId(oid),
            Bson::Array(items) => Self::Array(items.into_iter().map(Self::from_bson).collect()),
            Bson::Document(doc) => Self::from_document(doc),
            other => Self::String(other.to_string()),
        }
    }

    /// Converts a stored document into a map value.
    pub fn from_document(doc: Document) -> Self {
        Self::Map(
            doc.into_iter()
                .map(|(key, value)| (key, Self::from_bson(value)))
                .collect(),
        )
    }

    /// Converts to BSON without any field-specific coercion.
    ///
    /// Related instances are represented by their identity.
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Null => Bson::Null,
            Self::Bool(b) => Bson::Boolean(*b),
            Self::Int(i) => Bson::Int64(*i),
            Self::Float(f) => Bson::Double(*f),
            Self::String(s) => Bson::String(s.clone()),
            Self::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
            Self::Date(date) => Bson::DateTime(bson::DateTime::from_chrono(
                date.and_time(NaiveTime::MIN).and_utc(),
            )),
            Self::Time(time) => Bson::String(time.to_string()),
            Self::ObjectId(oid) => Bson::ObjectId(*oid),
            Self::Array(items) => Bson::Array(items.iter().map(Self::to_bson).collect()),
            Self::Map(entries) => Bson::Document(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_bson()))
                    .collect(),
            ),
            Self::Instance(instance) => instance.id().map_or(Bson::Null, Bson::ObjectId),
        }
    }

    /// Converts a wire JSON value without any field-specific coercion.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Converts to wire JSON without any field-specific coercion.
    ///
    /// Temporal values become ISO-8601 strings and identities become hex
    /// strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Date(date) => serde_json::Value::String(date.format("%Y-%m-%d").to_string()),
            Self::Time(time) => serde_json::Value::String(time.to_string()),
            Self::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Instance(instance) => instance
                .id()
                .map_or(serde_json::Value::Null, |oid| serde_json::Value::String(oid.to_hex())),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    DateTime<Utc> => DateTime,
    NaiveDate => Date,
    NaiveTime => Time,
    ObjectId => ObjectId,
    IndexMap<String, Value> => Map,
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Self::Instance(Box::new(instance))
    }
}

impl From<&Instance> for Value {
    fn from(instance: &Instance) -> Self {
        Self::Instance(Box::new(instance.clone()))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

fn mismatch(expected: &str, found: &Value) -> ValidationError {
    ValidationError::new(
        ErrorKind::Invalid,
        format!("expected {expected}, found {}", found.type_name()),
    )
}

macro_rules! impl_try_from {
    ($($ty:ty => $expected:literal, $pattern:pat => $out:expr),* $(,)?) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = ValidationError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        $pattern => Ok($out),
                        other => Err(mismatch($expected, &other)),
                    }
                }
            }
        )*
    };
}

impl_try_from! {
    String => "string", Value::String(s) => s,
    i64 => "int", Value::Int(i) => i,
    bool => "bool", Value::Bool(b) => b,
    ObjectId => "object id", Value::ObjectId(oid) => oid,
    DateTime<Utc> => "datetime", Value::DateTime(dt) => dt,
    NaiveDate => "date", Value::Date(date) => date,
    NaiveTime => "time", Value::Time(time) => time,
    Instance => "instance", Value::Instance(instance) => *instance,
    Vec<Value> => "array", Value::Array(items) => items,
}

impl TryFrom<Value> for f64 {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| mismatch("float", &value))
    }
}

/// Builds a list of `(field, value)` pairs for instance construction.
///
/// ```ignore
/// let user = User.objects(&db).create(values! { "name" => "alice", "age" => 30 }).await?;
/// ```
#[macro_export]
macro_rules! values {
    ($($name:expr => $value:expr),* $(,)?) => {
        ::std::vec![$(($name, $crate::Value::from($value))),*]
    };
}
