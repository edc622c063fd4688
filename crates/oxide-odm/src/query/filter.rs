//! Filter lookups and their compilation into storage filters.
//!
//! A lookup key is either driver-native (starts with `$`), a plain schema
//! field name, or `field__op` where `op` is one of [`Operator`]. Values are
//! serialized by the field they target; operator maps for the same field are
//! merged rather than replaced, and a plain value next to operators on the
//! same field becomes their `$eq` entry.

use std::collections::HashSet;

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;

use crate::error::{OdmError, Result};
use crate::fields::Field;
use crate::model::Instance;
use crate::schema::Schema;
use crate::value::Value;

/// The value side of a filter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A user-level value, serialized by the target field.
    Value(Value),
    /// A storage-level value, inserted verbatim.
    Raw(Bson),
}

impl Lookup {
    fn to_bson(&self) -> Bson {
        match self {
            Self::Value(value) => value.to_bson(),
            Self::Raw(bson) => bson.clone(),
        }
    }
}

macro_rules! impl_lookup_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Lookup {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

impl_lookup_from! {
    bool,
    i32,
    i64,
    u32,
    f32,
    f64,
    String,
    &str,
    DateTime<Utc>,
    NaiveDate,
    NaiveTime,
    bson::oid::ObjectId,
    Instance,
    &Instance,
}

impl From<Value> for Lookup {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Lookup {
    fn from(items: Vec<T>) -> Self {
        Self::Value(Value::from(items))
    }
}

impl From<Bson> for Lookup {
    fn from(value: Bson) -> Self {
        Self::Raw(value)
    }
}

impl From<Document> for Lookup {
    fn from(value: Document) -> Self {
        Self::Raw(Bson::Document(value))
    }
}

/// Operator suffixes accepted after `__` in a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Member of a list.
    In,
    /// Not a member of a list.
    Nin,
    /// Array containing every listed element.
    All,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Not equal.
    Ne,
    /// Field presence.
    Exists,
    /// Regular expression match.
    Regex,
    /// Array length.
    Size,
}

impl Operator {
    /// Parses an operator suffix.
    pub fn parse(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "in" => Self::In,
            "nin" => Self::Nin,
            "all" => Self::All,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "ne" => Self::Ne,
            "exists" => Self::Exists,
            "regex" => Self::Regex,
            "size" => Self::Size,
            _ => return None,
        })
    }

    /// Returns the storage operator, e.g. `$gte`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::All => "$all",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Ne => "$ne",
            Self::Exists => "$exists",
            Self::Regex => "$regex",
            Self::Size => "$size",
        }
    }
}

/// Splits a lookup key into its field name and operator.
fn split_key<'a>(schema: &Schema, key: &'a str) -> Result<(&'a str, Option<Operator>)> {
    if schema.has_field(key) {
        return Ok((key, None));
    }

    let Some((name, suffix)) = key.rsplit_once("__") else {
        return Err(unknown_field(schema, key));
    };
    if !schema.has_field(name) {
        return Err(unknown_field(schema, name));
    }
    let operator = Operator::parse(suffix).ok_or_else(|| {
        OdmError::InvalidQuery(format!("unknown lookup operator `{suffix}` in `{key}`"))
    })?;

    Ok((name, Some(operator)))
}

fn unknown_field(schema: &Schema, name: &str) -> OdmError {
    OdmError::InvalidQuery(format!("{} has no field named `{name}`", schema.name()))
}

fn serialize(field: &dyn Field, name: &str, lookup: &Lookup) -> Result<Bson> {
    match lookup {
        Lookup::Raw(bson) => Ok(bson.clone()),
        Lookup::Value(Value::Null) => Ok(Bson::Null),
        Lookup::Value(value) => field
            .db_serialize(value)
            .map_err(|e| OdmError::InvalidQuery(format!("invalid value for `{name}`: {e}"))),
    }
}

fn serialize_list(field: &dyn Field, name: &str, operator: Operator, lookup: &Lookup) -> Result<Bson> {
    match lookup {
        Lookup::Raw(bson) => Ok(bson.clone()),
        Lookup::Value(Value::Array(items)) => items
            .iter()
            .map(|item| serialize(field, name, &Lookup::Value(item.clone())))
            .collect::<Result<Vec<_>>>()
            .map(Bson::Array),
        Lookup::Value(_) => Err(OdmError::InvalidQuery(format!(
            "`{}` lookups on `{name}` take a list",
            operator.as_str()
        ))),
    }
}

/// Compiles user-level lookups into a storage filter.
///
/// `raw` entries are merged last, verbatim.
pub(crate) fn compile(
    schema: &Schema,
    lookups: &IndexMap<String, Lookup>,
    raw: &Document,
) -> Result<Document> {
    let mut filter = Document::new();
    // Fields whose filter entry is an operator map rather than a plain value.
    let mut operator_maps: HashSet<&str> = HashSet::new();

    for (key, lookup) in lookups {
        if key.starts_with('$') {
            filter.insert(key.clone(), lookup.to_bson());
            continue;
        }

        let (name, operator) = split_key(schema, key)?;
        let field = schema
            .field(name)
            .ok_or_else(|| unknown_field(schema, name))?
            .as_ref();

        let Some(operator) = operator else {
            let value = serialize(field, name, lookup)?;
            match filter.get_mut(name) {
                Some(Bson::Document(operators)) if operator_maps.contains(name) => {
                    operators.insert("$eq", value);
                }
                _ => {
                    filter.insert(name, value);
                }
            }
            continue;
        };

        let operand = match operator {
            Operator::In | Operator::Nin | Operator::All => {
                serialize_list(field, name, operator, lookup)?
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte | Operator::Ne => {
                serialize(field, name, lookup)?
            }
            Operator::Exists | Operator::Regex | Operator::Size => lookup.to_bson(),
        };

        if operator_maps.contains(name) {
            if let Some(Bson::Document(operators)) = filter.get_mut(name) {
                operators.insert(operator.as_str(), operand);
            }
            continue;
        }

        let mut operators = Document::new();
        if let Some(value) = filter.remove(name) {
            operators.insert("$eq", value);
        }
        operators.insert(operator.as_str(), operand);
        filter.insert(name, operators);
        operator_maps.insert(name);
    }

    for (key, value) in raw {
        filter.insert(key.clone(), value.clone());
    }

    Ok(filter)
}
