//! References to documents of other collections.
//!
//! Related documents are stored as their lookup key (`_id` unless
//! `to_field` says otherwise) and held in memory as resolved instances.

use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::Bson;
use indexmap::IndexMap;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, OdmError, ValidationError};
use crate::model::Instance;
use crate::query::Lookup;
use crate::queryset::QuerySet;
use crate::schema::Schema;
use crate::value::Value;

/// The target of a relation.
#[derive(Debug, Clone)]
pub enum Related {
    /// Another schema.
    Schema(Arc<Schema>),
    /// The schema that owns the field.
    SelfRef,
}

/// A reference to a single document of another collection.
///
/// # Example
///
/// ```ignore
/// let post = Schema::builder("Post")
///     .field("author", ForeignKey::new(&user).to_field("name"))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ForeignKey {
    /// The related schema.
    pub related: Related,
    /// Field on the related schema holding the lookup key.
    pub to_field: String,
    /// Field options.
    pub options: FieldOptions,
}

impl ForeignKey {
    /// Creates a ForeignKey to the given schema.
    pub fn new(related: &Arc<Schema>) -> Self {
        Self {
            related: Related::Schema(related.clone()),
            to_field: "_id".to_string(),
            options: FieldOptions::new(),
        }
    }

    /// Creates a ForeignKey to the owning schema.
    pub fn to_self() -> Self {
        Self {
            related: Related::SelfRef,
            to_field: "_id".to_string(),
            options: FieldOptions::new(),
        }
    }

    /// Sets the field to reference on the related model.
    #[must_use]
    pub fn to_field(mut self, field: &str) -> Self {
        self.to_field = field.to_string();
        self
    }

    fn related_schema(&self, cx: &FieldContext<'_>) -> Arc<Schema> {
        match &self.related {
            Related::Schema(schema) => schema.clone(),
            Related::SelfRef => cx.schema.clone(),
        }
    }

    /// Returns the stored key of a related instance.
    fn instance_key(&self, instance: &Instance) -> Result<Bson, ValidationError> {
        if !instance.is_persisted() {
            return Err(self.error(ErrorKind::ForeignKey, &[]));
        }
        let key = instance
            .get(&self.to_field)
            .map_err(|_| self.error(ErrorKind::Invalid, &[]))?;
        if key.is_null() {
            return Err(self.error(ErrorKind::ForeignKey, &[]));
        }
        match instance.schema().field(&self.to_field) {
            Some(field) => field.db_serialize(&key),
            None => Ok(key.to_bson()),
        }
    }

    /// Converts a raw key into its stored form.
    fn raw_key(&self, value: &Value) -> Result<Bson, ValidationError> {
        match value {
            Value::String(hex) if self.to_field == "_id" => ObjectId::parse_str(hex)
                .map(Bson::ObjectId)
                .map_err(|_| self.error(ErrorKind::Invalid, &[])),
            Value::String(_) | Value::Int(_) | Value::ObjectId(_) => Ok(value.to_bson()),
            _ => Err(self.error(ErrorKind::Invalid, &[])),
        }
    }

    async fn resolve(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let related = self.related_schema(cx);

        if let Value::Instance(instance) = value {
            if instance.schema().collection() != related.collection() {
                return Err(self.error(ErrorKind::Invalid, &[]));
            }
            self.instance_key(&instance)?;
            return Ok(Value::Instance(instance));
        }

        let key = self.raw_key(&value)?;
        let found = QuerySet::new(related, cx.db.clone())
            .filter(self.to_field.as_str(), Lookup::Raw(key))
            .get()
            .await;

        match found {
            Ok(instance) => Ok(Value::from(instance)),
            Err(OdmError::DoesNotExist { .. }) => Err(self.error(ErrorKind::ForeignKey, &[])),
            Err(e) => Err(ValidationError::new(ErrorKind::Invalid, e.to_string())),
        }
    }

    fn key_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Instance(instance) => instance
                .get(&self.to_field)
                .map_or(serde_json::Value::Null, |key| key.to_json()),
            other => other.to_json(),
        }
    }

    fn key_bson(&self, value: &Value) -> Result<Bson, ValidationError> {
        match value {
            Value::Null => Ok(Bson::Null),
            Value::Instance(instance) => self.instance_key(instance),
            other => self.raw_key(other),
        }
    }
}

#[async_trait]
impl Field for ForeignKey {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "foreign_key"
    }

    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.resolve(value, cx).await
    }

    fn serialize(&self, value: &Value) -> serde_json::Value {
        self.key_json(value)
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        self.key_bson(value)
    }

    fn default_widget(&self) -> Widget {
        Widget::select(Vec::new())
    }
}

/// A list of references to documents of another collection.
#[derive(Debug, Clone)]
pub struct ManyToMany {
    target: ForeignKey,
    /// Field options.
    pub options: FieldOptions,
}

impl ManyToMany {
    /// Creates a ManyToMany to the given schema.
    pub fn new(related: &Arc<Schema>) -> Self {
        Self {
            target: ForeignKey::new(related),
            options: FieldOptions::new(),
        }
    }

    /// Creates a ManyToMany to the owning schema.
    pub fn to_self() -> Self {
        Self {
            target: ForeignKey::to_self(),
            options: FieldOptions::new(),
        }
    }

    /// Sets the field to reference on the related model.
    #[must_use]
    pub fn to_field(mut self, field: &str) -> Self {
        self.target = self.target.to_field(field);
        self
    }

    /// Rewrites a per-item failure with this field's message table.
    fn item_error(&self, error: ValidationError) -> ValidationError {
        match error.kind() {
            Some(kind) if self.options.error_messages.contains_key(&kind) => self.error(kind, &[]),
            _ => error,
        }
    }
}

#[async_trait]
impl Field for ManyToMany {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "many_to_many"
    }

    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let Value::Array(items) = value else {
            return Err(self.error(ErrorKind::Invalid, &[]));
        };

        let mut out = Vec::with_capacity(items.len());
        let mut errors = IndexMap::new();
        for (i, item) in items.into_iter().enumerate() {
            match self.target.resolve(item, cx).await {
                Ok(item) => out.push(item),
                Err(e) => {
                    errors.insert(i.to_string(), self.item_error(e));
                }
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError::Fields(errors));
        }

        Ok(Value::Array(out))
    }

    fn serialize(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|item| self.target.key_json(item)).collect())
            }
            other => other.to_json(),
        }
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.target.key_bson(item).map_err(|e| self.item_error(e)))
                .collect::<Result<Vec<_>, _>>()
                .map(Bson::Array),
            other => self.target.key_bson(other).map_err(|e| self.item_error(e)),
        }
    }

    fn default_widget(&self) -> Widget {
        Widget::select(Vec::new()).attr("multiple", "multiple")
    }
}

impl_options!(ForeignKey, ManyToMany);
