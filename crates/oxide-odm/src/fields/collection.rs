//! Composite field types: arrays, maps, JSON blobs and embedded documents.
//!
//! Composite fields validate their members with child fields and report
//! member failures as a nested [`ValidationError::Fields`] map keyed by item
//! index or member name.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use indexmap::IndexMap;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, ValidationError};
use crate::schema::Schema;
use crate::value::Value;

fn nested(errors: IndexMap<String, ValidationError>) -> Result<(), ValidationError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Fields(errors))
    }
}

/// A list of values, optionally validated by a child field.
///
/// # Example
///
/// ```ignore
/// let tags = ArrayField::new().of(StringField::new().max_length(20));
/// ```
#[derive(Debug, Clone)]
pub struct ArrayField {
    child: Option<Arc<dyn Field>>,
    /// Field options.
    pub options: FieldOptions,
}

impl ArrayField {
    /// Creates an ArrayField accepting any items.
    pub fn new() -> Self {
        Self {
            child: None,
            options: FieldOptions::new(),
        }
    }

    /// Validates every item with `field`.
    #[must_use]
    pub fn of(mut self, field: impl Field + 'static) -> Self {
        self.child = Some(Arc::new(field));
        self
    }

    async fn each<'a, F, Fut>(&'a self, value: Value, f: F) -> Result<Value, ValidationError>
    where
        F: Fn(&'a Arc<dyn Field>, Value) -> Fut,
        Fut: std::future::Future<Output = Result<Value, ValidationError>>,
    {
        let Value::Array(items) = value else {
            return Err(self.error(ErrorKind::Invalid, &[]));
        };
        let Some(child) = &self.child else {
            return Ok(Value::Array(items));
        };

        let mut out = Vec::with_capacity(items.len());
        let mut errors = IndexMap::new();
        for (i, item) in items.into_iter().enumerate() {
            match f(child, item).await {
                Ok(item) => out.push(item),
                Err(e) => {
                    errors.insert(i.to_string(), e);
                }
            }
        }
        nested(errors)?;

        Ok(Value::Array(out))
    }
}

impl Default for ArrayField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for ArrayField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "array"
    }

    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.each(value, |child, item| child.validate(item, cx)).await
    }

    async fn deserialize(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.each(value, |child, item| child.deserialize(item, cx)).await
    }

    fn serialize(&self, value: &Value) -> serde_json::Value {
        match (value, &self.child) {
            (Value::Array(items), Some(child)) => {
                serde_json::Value::Array(items.iter().map(|item| child.serialize(item)).collect())
            }
            _ => value.to_json(),
        }
    }

    /// Scalars are serialized with the child field so that membership
    /// lookups such as `tags = "rust"` match stored items.
    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        let Some(child) = &self.child else {
            return Ok(value.to_bson());
        };
        let Value::Array(items) = value else {
            return child.db_serialize(value);
        };

        let mut out = Vec::with_capacity(items.len());
        let mut errors = IndexMap::new();
        for (i, item) in items.iter().enumerate() {
            match child.db_serialize(item) {
                Ok(item) => out.push(item),
                Err(e) => {
                    errors.insert(i.to_string(), e);
                }
            }
        }
        nested(errors)?;

        Ok(Bson::Array(out))
    }
}

/// A string-keyed map, optionally validating values with a child field.
#[derive(Debug, Clone)]
pub struct MapField {
    child: Option<Arc<dyn Field>>,
    /// Field options.
    pub options: FieldOptions,
}

impl MapField {
    /// Creates a MapField accepting any values.
    pub fn new() -> Self {
        Self {
            child: None,
            options: FieldOptions::new(),
        }
    }

    /// Validates every value with `field`.
    #[must_use]
    pub fn of(mut self, field: impl Field + 'static) -> Self {
        self.child = Some(Arc::new(field));
        self
    }
}

impl Default for MapField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for MapField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "map"
    }

    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let Value::Map(entries) = value else {
            return Err(self.error(ErrorKind::Invalid, &[]));
        };
        let Some(child) = &self.child else {
            return Ok(Value::Map(entries));
        };

        let mut out = IndexMap::with_capacity(entries.len());
        let mut errors = IndexMap::new();
        for (key, item) in entries {
            match child.validate(item, cx).await {
                Ok(item) => {
                    out.insert(key, item);
                }
                Err(e) => {
                    errors.insert(key, e);
                }
            }
        }
        nested(errors)?;

        Ok(Value::Map(out))
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        match (value, &self.child) {
            (Value::Map(entries), Some(child)) => {
                let mut doc = Document::new();
                for (key, item) in entries {
                    doc.insert(key.clone(), child.db_serialize(item)?);
                }
                Ok(Bson::Document(doc))
            }
            _ => Ok(value.to_bson()),
        }
    }
}

/// Arbitrary JSON-compatible data.
///
/// Strings holding a JSON object or array are parsed; other values are kept
/// as they are.
#[derive(Debug, Clone)]
pub struct JsonField {
    /// Field options.
    pub options: FieldOptions,
}

impl JsonField {
    /// Creates a new JsonField.
    pub fn new() -> Self {
        Self {
            options: FieldOptions::new(),
        }
    }
}

impl Default for JsonField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for JsonField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "json"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        match value {
            Value::String(text) if text.trim_start().starts_with(['{', '[']) => {
                serde_json::from_str(&text)
                    .map(Value::from_json)
                    .map_err(|_| self.error(ErrorKind::Invalid, &[]))
            }
            Value::Instance(_) => Err(self.error(ErrorKind::Invalid, &[])),
            other => Ok(other),
        }
    }

    fn default_widget(&self) -> Widget {
        Widget::textarea()
    }
}

/// A sub-document validated against its own schema.
///
/// The embedded schema's `_id` field is ignored.
#[derive(Debug, Clone)]
pub struct EmbeddedField {
    /// Schema of the embedded document.
    pub schema: Arc<Schema>,
    /// Field options.
    pub options: FieldOptions,
}

impl EmbeddedField {
    /// Creates a field embedding documents of `schema`.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: schema.clone(),
            options: FieldOptions::new(),
        }
    }

    fn entries(&self, value: Value) -> Result<IndexMap<String, Value>, ValidationError> {
        match value {
            Value::Map(entries) => Ok(entries),
            Value::Instance(instance) if instance.schema().name() == self.schema.name() => {
                Ok(instance.into_values())
            }
            _ => Err(self.error(ErrorKind::Invalid, &[])),
        }
    }

    fn members(&self) -> impl Iterator<Item = (&str, &Arc<dyn Field>)> {
        self.schema.fields().filter(|(name, _)| *name != "_id")
    }
}

#[async_trait]
impl Field for EmbeddedField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "embedded"
    }

    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let mut entries = self.entries(value)?;
        let inner = FieldContext::new(cx.db, &self.schema);

        let mut out = IndexMap::new();
        let mut errors = IndexMap::new();
        for (name, field) in self.members() {
            let item = entries.shift_remove(name).unwrap_or_default();
            match field.validate(item, &inner).await {
                Ok(item) => {
                    out.insert(name.to_string(), item);
                }
                Err(e) => {
                    errors.insert(name.to_string(), e);
                }
            }
        }
        nested(errors)?;

        Ok(Value::Map(out))
    }

    fn serialize(&self, value: &Value) -> serde_json::Value {
        let Value::Map(entries) = value else {
            return value.to_json();
        };
        serde_json::Value::Object(
            self.members()
                .map(|(name, field)| {
                    let item = entries.get(name).cloned().unwrap_or_default();
                    (name.to_string(), field.serialize(&item))
                })
                .collect(),
        )
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        let Value::Map(entries) = value else {
            return Ok(value.to_bson());
        };

        let mut doc = Document::new();
        let mut errors = IndexMap::new();
        for (name, field) in self.members() {
            let item = entries.get(name).cloned().unwrap_or_default();
            match field.db_serialize(&item) {
                Ok(item) => {
                    doc.insert(name, item);
                }
                Err(e) => {
                    errors.insert(name.to_string(), e);
                }
            }
        }
        nested(errors)?;

        Ok(Bson::Document(doc))
    }
}

impl_options!(ArrayField, MapField, JsonField, EmbeddedField);
