//! Model instances.
//!
//! An [`Instance`] holds the values of one document together with the schema
//! that describes them and the database it persists to.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Document};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::database::Database;
use crate::driver::{DriverError, DriverErrorKind};
use crate::error::{ErrorKind, OdmError, Result, ValidationError};
use crate::fields::FieldContext;
use crate::schema::{Schema, ID_FIELD};
use crate::value::Value;

/// One document of a model, in memory.
///
/// Field values are read and written by name; names outside the schema fail
/// with [`OdmError::UnknownField`].
///
/// # Example
///
/// ```ignore
/// let mut alice = Instance::new(&user, &db, values! { "name" => "alice" })?;
/// alice.save().await?;
/// assert!(alice.is_persisted());
///
/// alice.set("age", 31)?;
/// alice.save().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Instance {
    schema: Arc<Schema>,
    db: Database,
    data: IndexMap<String, Value>,
    explicit: HashSet<String>,
}

impl Instance {
    /// Creates an unsaved instance from caller-supplied values.
    pub fn new<I, K, V>(schema: &Arc<Schema>, db: &Database, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = Self {
            schema: schema.clone(),
            db: db.clone(),
            data: IndexMap::new(),
            explicit: HashSet::new(),
        };
        for (name, value) in values {
            instance.set(name, value)?;
        }
        Ok(instance)
    }

    /// Builds an instance from a stored document.
    ///
    /// Fields listed in `raw_fields` keep their storage form. Values that no
    /// longer deserialize are logged and read back as `Null`.
    pub async fn from_db(
        schema: Arc<Schema>,
        db: Database,
        document: Document,
        raw_fields: &[String],
    ) -> Self {
        let mut instance = Self {
            schema,
            db,
            data: IndexMap::new(),
            explicit: HashSet::new(),
        };
        let values = document
            .into_iter()
            .map(|(name, value)| (name, Value::from_bson(value)));
        instance.load(values, raw_fields).await;
        instance
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the identity, if persisted.
    pub fn id(&self) -> Option<ObjectId> {
        self.data.get(ID_FIELD).and_then(Value::as_object_id)
    }

    /// Returns whether the instance has an identity.
    pub fn is_persisted(&self) -> bool {
        self.persisted_key().is_some()
    }

    fn persisted_key(&self) -> Option<&Value> {
        self.data.get(ID_FIELD).filter(|id| !id.is_null())
    }

    fn unknown(&self, name: &str) -> OdmError {
        OdmError::UnknownField {
            model: self.schema.name().to_string(),
            field: name.to_string(),
        }
    }

    /// Returns the current value of `name`, falling back to the field's
    /// literal default.
    pub fn get(&self, name: &str) -> Result<Value> {
        let field = self.schema.field(name).ok_or_else(|| self.unknown(name))?;
        Ok(self
            .data
            .get(name)
            .cloned()
            .unwrap_or_else(|| field.options().default.literal()))
    }

    /// Returns the value of `name` converted to `T`; `None` when null.
    pub fn get_as<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: TryFrom<Value, Error = ValidationError>,
    {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        T::try_from(value)
            .map(Some)
            .map_err(|e| ValidationError::for_field(name, e).into())
    }

    /// Assigns `value` to `name`.
    ///
    /// Assigned values count as caller-supplied until the next save, which
    /// matters for read-only fields.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if !self.schema.has_field(&name) {
            return Err(self.unknown(&name));
        }
        self.explicit.insert(name.clone());
        self.data.insert(name, value.into());
        Ok(())
    }

    /// Returns the values held in memory.
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    /// Consumes the instance, returning its values.
    pub fn into_values(self) -> IndexMap<String, Value> {
        self.data
    }

    /// Returns the wire form of every field.
    pub fn serialize(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.schema
                .fields()
                .map(|(name, field)| {
                    let value = self.get(name).unwrap_or_default();
                    (name.to_string(), field.serialize(&value))
                })
                .collect(),
        )
    }

    /// Returns the storage form of every field.
    pub fn db_serialize(&self) -> Result<Document> {
        let mut document = Document::new();
        let mut errors = IndexMap::new();

        for (name, field) in self.schema.fields() {
            let value = self.get(name)?;
            match field.db_serialize(&value) {
                Ok(value) => {
                    document.insert(name, value);
                }
                Err(e) => {
                    errors.insert(name.to_string(), e);
                }
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError::Fields(errors).into());
        }
        Ok(document)
    }

    /// Validates every field and enforces uniqueness.
    ///
    /// All failures are reported together, keyed by field name. On success
    /// the coerced values replace the in-memory ones.
    pub async fn validate(&mut self) -> Result<()> {
        let cx = FieldContext::new(&self.db, &self.schema);
        let mut validated = IndexMap::new();
        let mut errors = IndexMap::new();

        for (name, field) in self.schema.fields() {
            let value = self.data.get(name).cloned().unwrap_or_default();
            let explicit = self.explicit.contains(name);
            match field.validate_with(value, &cx, explicit).await {
                Ok(value) => {
                    validated.insert(name.to_string(), value);
                }
                Err(e) => {
                    errors.insert(name.to_string(), e);
                }
            }
        }

        let own_id = self.persisted_key().map(Value::to_bson);
        for (name, field) in self.schema.unique_fields() {
            let Some(value) = validated.get(name).filter(|value| !value.is_null()) else {
                continue;
            };
            let key = match field.db_serialize(value) {
                Ok(key) => key,
                Err(e) => {
                    errors.insert(name.to_string(), e);
                    continue;
                }
            };

            let mut filter = Document::new();
            filter.insert(name, key);
            let holder = self
                .db
                .driver()
                .find_one(self.schema.collection(), filter, Some(doc! { "_id": 1 }))
                .await?;

            if let Some(holder) = holder {
                if holder.get(ID_FIELD) != own_id.as_ref() {
                    errors.insert(name.to_string(), self.unique_error());
                }
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError::Fields(errors).into());
        }

        self.data = validated;
        Ok(())
    }

    fn unique_error(&self) -> ValidationError {
        ValidationError::new(
            ErrorKind::Unique,
            self.schema.error_message(ErrorKind::Unique),
        )
    }

    /// Fires the first-persistence hook of every field.
    pub fn on_create(&mut self) {
        for (name, field) in self.schema.fields() {
            let current = self.data.get(name).cloned().unwrap_or_default();
            let next = field.on_create(current.clone());
            if next != current {
                self.data.insert(name.to_string(), next);
            }
        }
    }

    /// Fires the every-persistence hook of every field.
    pub fn on_save(&mut self) {
        for (name, field) in self.schema.fields() {
            let current = self.data.get(name).cloned().unwrap_or_default();
            let next = field.on_save(current.clone());
            if next != current {
                self.data.insert(name.to_string(), next);
            }
        }
    }

    /// Validates and persists the instance.
    ///
    /// The first save inserts the document and writes the generated identity
    /// back; later saves replace the stored document.
    pub async fn save(&mut self) -> Result<()> {
        self.persist(true).await
    }

    /// Persists the instance without validating it.
    ///
    /// Meant for internal writes of trusted data.
    pub async fn force_save(&mut self) -> Result<()> {
        self.persist(false).await
    }

    async fn persist(&mut self, validate: bool) -> Result<()> {
        if !self.is_persisted() {
            self.on_create();
        }
        self.on_save();

        if validate {
            self.validate().await?;
        } else {
            self.resolve_defaults().await;
        }

        let mut document = self.db_serialize()?;
        document.remove(ID_FIELD);

        let driver = self.db.driver();
        let collection = self.schema.collection();

        if let Some(id) = self.persisted_key().map(Value::to_bson) {
            debug!(collection, id = %id, "replacing document");
            let matched = driver
                .replace_one(collection, doc! { "_id": id.clone() }, document.clone())
                .await
                .map_err(|e| self.translate(e))?;

            if matched == 0 {
                debug!(collection, id = %id, "document is gone, inserting it again");
                document.insert(ID_FIELD, id);
                driver
                    .insert_one(collection, document)
                    .await
                    .map_err(|e| self.translate(e))?;
            }
        } else {
            debug!(collection, "inserting document");
            let id = driver
                .insert_one(collection, document)
                .await
                .map_err(|e| self.translate(e))?;
            self.data.insert(ID_FIELD.to_string(), Value::from_bson(id));
        }

        self.explicit.clear();
        Ok(())
    }

    async fn resolve_defaults(&mut self) {
        for (name, field) in self.schema.fields() {
            if self.data.get(name).map_or(true, Value::is_null) {
                let value = field.options().default.resolve().await;
                self.data.insert(name.to_string(), value);
            }
        }
    }

    /// Maps a storage-level unique violation onto the field it guards.
    fn translate(&self, error: DriverError) -> OdmError {
        if let DriverErrorKind::DuplicateKey { index: Some(index) } = &error.kind {
            let name = index.strip_suffix("_1").unwrap_or(index);
            for candidate in [index.as_str(), name] {
                if candidate != ID_FIELD && self.schema.has_field(candidate) {
                    return ValidationError::for_field(candidate, self.unique_error()).into();
                }
            }
        }
        error.into()
    }

    /// Assigns `values` and saves.
    pub async fn update<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in values {
            self.set(name, value)?;
        }
        self.save().await
    }

    /// Reloads the stored document. No-op when never persisted.
    ///
    /// Stored fields overwrite their in-memory values; fields missing from the
    /// stored document keep whatever the instance holds.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(id) = self.persisted_key().map(Value::to_bson) else {
            return Ok(());
        };

        let document = self
            .db
            .driver()
            .find_one(self.schema.collection(), doc! { "_id": id }, None)
            .await?
            .ok_or_else(|| OdmError::DoesNotExist {
                model: self.schema.name().to_string(),
            })?;

        let values = document
            .into_iter()
            .map(|(name, value)| (name, Value::from_bson(value)));
        let stored = self.decode(values, &[]).await;
        for name in stored.keys() {
            self.explicit.remove(name);
        }
        self.data.extend(stored);
        Ok(())
    }

    /// Removes the stored document. No-op when never persisted.
    ///
    /// The in-memory identity is kept.
    pub async fn delete(&mut self) -> Result<()> {
        let Some(id) = self.persisted_key().map(Value::to_bson) else {
            return Ok(());
        };

        debug!(collection = self.schema.collection(), id = %id, "deleting document");
        self.db
            .driver()
            .delete(self.schema.collection(), doc! { "_id": id }, false)
            .await?;
        Ok(())
    }

    /// Re-applies field deserialization to the in-memory values.
    pub async fn deserialize(&mut self) {
        let values = std::mem::take(&mut self.data);
        self.load(values, &[]).await;
    }

    async fn load(&mut self, values: impl IntoIterator<Item = (String, Value)>, raw_fields: &[String]) {
        self.data = self.decode(values, raw_fields).await;
        self.explicit.clear();
    }

    async fn decode(
        &self,
        values: impl IntoIterator<Item = (String, Value)>,
        raw_fields: &[String],
    ) -> IndexMap<String, Value> {
        let cx = FieldContext::new(&self.db, &self.schema);
        let mut data = IndexMap::new();

        for (name, value) in values {
            let Some(field) = self.schema.field(&name) else {
                debug!(model = self.schema.name(), field = %name, "ignoring unknown stored field");
                continue;
            };

            if raw_fields.contains(&name) {
                data.insert(name, value);
                continue;
            }

            match field.deserialize(value, &cx).await {
                Ok(value) => {
                    data.insert(name, value);
                }
                Err(error) => {
                    warn!(
                        model = self.schema.name(),
                        field = %name,
                        %error,
                        "stored value failed to deserialize"
                    );
                    data.insert(name, Value::Null);
                }
            }
        }

        data
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} object", self.schema.name())
    }
}

/// Two instances are equal when they belong to the same collection and
/// carry the same non-null identity.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.schema.collection() == other.schema.collection()
            && matches!(
                (self.persisted_key(), other.persisted_key()),
                (Some(a), Some(b)) if a == b
            )
    }
}
