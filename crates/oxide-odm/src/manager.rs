//! Per-model entry points to a collection.
//!
//! The Manager is the per-model entry point: it hands out query sets and
//! creates instances.

use std::sync::Arc;

use bson::Document;
use tracing::info;

use crate::database::Database;
use crate::error::Result;
use crate::model::Instance;
use crate::query::Lookup;
use crate::queryset::{Documents, QuerySet};
use crate::schema::Schema;
use crate::value::Value;

/// Per-model entry point producing query sets and creating instances.
///
/// Every method has a default implementation; a custom manager only
/// supplies [`schema`](Manager::schema) and [`database`](Manager::database)
/// and overrides what it needs, typically [`create`](Manager::create).
///
/// # Example
///
/// ```ignore
/// struct AuditLog(Objects);
///
/// impl Manager for AuditLog {
///     fn schema(&self) -> &Arc<Schema> { self.0.schema() }
///     fn database(&self) -> &Database { self.0.database() }
///
///     async fn create<I, K, V>(&self, values: I) -> Result<Instance>
///     where
///         I: IntoIterator<Item = (K, V)>,
///         K: Into<String>,
///         V: Into<Value>,
///     {
///         self.build(values)
///     }
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait Manager {
    /// Returns the managed schema.
    fn schema(&self) -> &Arc<Schema>;

    /// Returns the database the manager reads and writes.
    fn database(&self) -> &Database;

    /// Returns an unfiltered query set over the collection.
    fn all(&self) -> QuerySet {
        QuerySet::new(self.schema().clone(), self.database().clone())
    }

    /// Returns a QuerySet filtered by one lookup.
    fn filter(&self, key: &str, value: impl Into<Lookup>) -> QuerySet {
        self.all().filter(key, value)
    }

    /// Returns a QuerySet with a driver-native filter merged in.
    fn raw(&self, filter: Document) -> QuerySet {
        self.all().raw(filter)
    }

    /// Returns a QuerySet fetching only the given fields.
    fn only(&self, fields: &[&str]) -> QuerySet {
        self.all().only(fields)
    }

    /// Returns a QuerySet yielding raw documents.
    fn values(&self) -> QuerySet<Documents> {
        self.all().values()
    }

    /// Returns an ordered QuerySet.
    fn order_by(&self, specs: &[&str]) -> QuerySet {
        self.all().order_by(specs)
    }

    /// Returns a QuerySet leaving the given fields in storage form.
    fn raw_fields(&self, fields: &[&str]) -> QuerySet {
        self.all().raw_fields(fields)
    }

    /// Creates an unsaved instance.
    fn build<I, K, V>(&self, values: I) -> Result<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Instance::new(self.schema(), self.database(), values)
    }

    /// Creates, validates and saves an instance.
    async fn create<I, K, V>(&self, values: I) -> Result<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = self.build(values)?;
        instance.save().await?;
        Ok(instance)
    }

    /// Returns the single object where `key` matches `value`.
    async fn get(&self, key: &str, value: impl Into<Lookup>) -> Result<Instance> {
        self.all().get_by(key, value).await
    }

    /// Returns the number of objects.
    async fn count(&self) -> Result<u64> {
        self.all().count().await
    }

    /// Returns the object with the smallest identity.
    async fn first(&self) -> Result<Instance> {
        self.all().first().await
    }

    /// Returns the object with the largest identity.
    async fn last(&self) -> Result<Instance> {
        self.all().last().await
    }

    /// Creates a unique index, named after the field, for every unique field.
    ///
    /// The in-process uniqueness check in [`Instance::validate`] only gives
    /// friendlier errors; these indexes are what rejects concurrent
    /// duplicates.
    async fn prepare(&self) -> Result<Vec<String>> {
        let schema = self.schema();
        let mut created = Vec::new();

        for (name, _) in schema.unique_fields() {
            let mut keys = Document::new();
            keys.insert(name, 1);
            let index = self
                .database()
                .driver()
                .create_index(schema.collection(), name, keys, true)
                .await?;
            info!(collection = schema.collection(), index = %index, "created unique index");
            created.push(index);
        }

        Ok(created)
    }
}

/// The default manager.
#[derive(Debug, Clone)]
pub struct Objects {
    schema: Arc<Schema>,
    db: Database,
}

impl Objects {
    /// Creates a manager for `schema` on `db`.
    pub fn new(schema: Arc<Schema>, db: Database) -> Self {
        Self { schema, db }
    }
}

impl Manager for Objects {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn database(&self) -> &Database {
        &self.db
    }
}
