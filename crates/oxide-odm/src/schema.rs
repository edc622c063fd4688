//! Schema definitions.
//!
//! A [`Schema`] is the frozen, ordered set of fields of a model. It is built
//! once through [`SchemaBuilder`] and shared behind an `Arc` by every
//! manager, query set and instance of the model.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::database::Database;
use crate::error::{ErrorKind, OdmError, Result};
use crate::fields::{Field, IdField};
use crate::manager::Objects;

/// Name of the implicit identity field.
pub const ID_FIELD: &str = "_id";

/// An immutable, ordered model schema.
///
/// # Example
///
/// ```ignore
/// let user = Schema::builder("User")
///     .field("name", StringField::new().options(FieldOptions::new().unique(true)))
///     .field("age", IntegerField::new().options(FieldOptions::new().required(false)))
///     .build()?;
///
/// let alice = user.objects(&db).create(values! { "name" => "alice" }).await?;
/// ```
#[derive(Debug)]
pub struct Schema {
    name: String,
    collection: String,
    fields: IndexMap<String, Arc<dyn Field>>,
    error_messages: HashMap<ErrorKind, String>,
}

impl Schema {
    /// Starts building a schema for the model `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the storage collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the field bound to `name`.
    pub fn field(&self, name: &str) -> Option<&Arc<dyn Field>> {
        self.fields.get(name)
    }

    /// Returns whether `name` is a schema field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over `(name, field)` pairs in declaration order, `_id` first.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Arc<dyn Field>)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Iterates over the fields flagged unique.
    pub fn unique_fields(&self) -> impl Iterator<Item = (&str, &Arc<dyn Field>)> {
        self.fields().filter(|(_, field)| field.options().unique)
    }

    /// Returns the model-level message template for `kind`.
    pub fn error_message(&self, kind: ErrorKind) -> &str {
        self.error_messages
            .get(&kind)
            .map_or(kind.default_message(), String::as_str)
    }

    /// Returns the metadata of every field, in order.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::Value::Array(self.fields.values().map(|field| field.metadata()).collect())
    }

    /// Returns the default manager bound to `db`.
    pub fn objects(self: &Arc<Self>, db: &Database) -> Objects {
        Objects::new(self.clone(), db.clone())
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    parents: Vec<Arc<Schema>>,
    fields: Vec<(String, Arc<dyn Field>)>,
    error_messages: HashMap<ErrorKind, String>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            parents: Vec::new(),
            fields: Vec::new(),
            error_messages: HashMap::new(),
        }
    }

    /// Sets the collection name. Defaults to the lowercased model name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Inherits the fields and messages of `parent`.
    ///
    /// Later parents override earlier ones on name collision.
    #[must_use]
    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parents.push(parent.clone());
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: impl Field + 'static) -> Self {
        self.fields.push((name.into(), Arc::new(field)));
        self
    }

    /// Overrides the model-level message template for `kind`.
    #[must_use]
    pub fn error(mut self, kind: ErrorKind, template: impl Into<String>) -> Self {
        self.error_messages.insert(kind, template.into());
        self
    }

    /// Freezes the schema.
    ///
    /// The identity field comes first, then inherited fields in parent order,
    /// then own fields. A field that overrides an inherited one keeps the
    /// inherited position.
    ///
    /// Fails with [`OdmError::Config`] when a field is already bound under
    /// another name, e.g. when its options were cloned from a built schema.
    pub fn build(self) -> Result<Arc<Schema>> {
        let mut fields: IndexMap<String, Arc<dyn Field>> = IndexMap::new();
        let id: Arc<dyn Field> = Arc::new(IdField::new());
        id.options().bind(ID_FIELD);
        fields.insert(ID_FIELD.to_string(), id);

        let mut error_messages = HashMap::new();
        error_messages.insert(
            ErrorKind::Unique,
            ErrorKind::Unique.default_message().to_string(),
        );

        for parent in &self.parents {
            for (name, field) in parent.fields() {
                if name != ID_FIELD {
                    fields.insert(name.to_string(), field.clone());
                }
            }
            error_messages.extend(
                parent
                    .error_messages
                    .iter()
                    .map(|(kind, template)| (*kind, template.clone())),
            );
        }

        for (name, field) in self.fields {
            if !field.options().bind(&name) && field.name() != name {
                return Err(OdmError::Config(format!(
                    "field `{name}` of {} is already bound as `{}`",
                    self.name,
                    field.name()
                )));
            }
            fields.insert(name, field);
        }

        error_messages.extend(self.error_messages);

        let collection = self
            .collection
            .unwrap_or_else(|| self.name.to_lowercase());

        tracing::debug!(model = %self.name, fields = fields.len(), "schema built");
        Ok(Arc::new(Schema {
            name: self.name,
            collection,
            fields,
            error_messages,
        }))
    }
}
