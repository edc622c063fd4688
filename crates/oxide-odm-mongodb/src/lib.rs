//! # oxide-odm-mongodb
//!
//! MongoDB storage driver for `oxide-odm`, built on the official `mongodb`
//! crate.
//!
//! ```ignore
//! use oxide_odm::{Manager, Settings};
//!
//! let settings = Settings::from_env()?;
//! let db = oxide_odm_mongodb::connect(&settings).await?;
//! let users = db.objects(&user);
//! users.prepare().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::error::{ErrorKind, WriteFailure, RETRYABLE_WRITE_ERROR};
use mongodb::options::{ClientOptions, CountOptions, FindOneOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use oxide_odm::driver::{DocumentStream, Driver, DriverError, FindOptions};
use oxide_odm::{Database, OdmError, Proxy, Settings};
use tracing::{debug, info};

/// Server error code for unique index violations.
const DUPLICATE_KEY: i32 = 11000;

/// Opens a database handle for `settings`, behind a retrying proxy.
pub async fn connect(settings: &Settings) -> oxide_odm::Result<Database> {
    let driver = MongoDriver::connect(settings).await?;
    Ok(Database::new(Proxy::new(driver, settings.retry_policy())))
}

/// [`Driver`] over a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: Client,
    database: mongodb::Database,
}

impl MongoDriver {
    /// Wraps an existing client and database.
    pub fn new(client: Client, database: mongodb::Database) -> Self {
        Self { client, database }
    }

    /// Connects to the server named by `settings`.
    pub async fn connect(settings: &Settings) -> oxide_odm::Result<Self> {
        let mut options = ClientOptions::parse(&settings.mongodb_uri)
            .await
            .map_err(|e| OdmError::Config(format!("invalid mongodb_uri: {e}")))?;
        apply_client_settings(&mut options, &settings.client_settings)?;

        let client = Client::with_options(options).map_err(|e| OdmError::Config(e.to_string()))?;
        let name = settings.database_name();
        info!(database = %name, "connected to mongodb");

        let database = client.database(&name);
        Ok(Self::new(client, database))
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn apply_client_settings(
    options: &mut ClientOptions,
    settings: &serde_json::Map<String, serde_json::Value>,
) -> oxide_odm::Result<()> {
    for (key, value) in settings {
        let invalid = || OdmError::Config(format!("invalid client setting `{key}`: {value}"));
        match key.as_str() {
            "app_name" => options.app_name = Some(value.as_str().ok_or_else(invalid)?.to_string()),
            "max_pool_size" => {
                options.max_pool_size = Some(as_u32(value).ok_or_else(invalid)?);
            }
            "min_pool_size" => {
                options.min_pool_size = Some(as_u32(value).ok_or_else(invalid)?);
            }
            "connect_timeout_ms" => {
                options.connect_timeout =
                    Some(Duration::from_millis(value.as_u64().ok_or_else(invalid)?));
            }
            "server_selection_timeout_ms" => {
                options.server_selection_timeout =
                    Some(Duration::from_millis(value.as_u64().ok_or_else(invalid)?));
            }
            "retry_writes" => options.retry_writes = Some(value.as_bool().ok_or_else(invalid)?),
            "retry_reads" => options.retry_reads = Some(value.as_bool().ok_or_else(invalid)?),
            _ => {
                return Err(OdmError::Config(format!("unknown client setting `{key}`")));
            }
        }
    }
    Ok(())
}

fn as_u32(value: &serde_json::Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

/// Classifies a driver error for the retry proxy and unique translation.
fn classify(error: &mongodb::error::Error) -> DriverError {
    let message = error.to_string();
    if error.contains_label(RETRYABLE_WRITE_ERROR) {
        return DriverError::transient(message);
    }

    match error.kind.as_ref() {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            DriverError::transient(message)
        }
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => {
            DriverError::duplicate_key(duplicate_index(&e.message), message)
        }
        ErrorKind::Command(e) if e.code == DUPLICATE_KEY => {
            DriverError::duplicate_key(duplicate_index(&e.message), message)
        }
        _ => DriverError::other(message),
    }
}

/// Extracts the index name from a server message such as
/// `E11000 duplicate key error collection: app.user index: name_1 dup key: { .. }`.
fn duplicate_index(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("index: ")?;
    let name = rest.split_whitespace().next()?;
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl Driver for MongoDriver {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError> {
        let result = self
            .collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| classify(&e))?;
        Ok(result.inserted_id)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError> {
        let result = self
            .collection(collection)
            .replace_one(filter, replacement)
            .await
            .map_err(|e| classify(&e))?;
        Ok(result.matched_count)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError> {
        let mut options = FindOneOptions::default();
        options.projection = projection;
        self.collection(collection)
            .find_one(filter)
            .with_options(options)
            .await
            .map_err(|e| classify(&e))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError> {
        let mut find = mongodb::options::FindOptions::default();
        find.sort = options.sort;
        find.skip = options.skip;
        find.limit = options
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        find.projection = options.projection;

        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(find)
            .await
            .map_err(|e| classify(&e))?;
        Ok(cursor.map_err(|e| classify(&e)).boxed())
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError> {
        let mut options = CountOptions::default();
        options.skip = skip;
        options.limit = limit;
        self.collection(collection)
            .count_documents(filter)
            .with_options(options)
            .await
            .map_err(|e| classify(&e))
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError> {
        let collection = self.collection(collection);
        let result = if many {
            collection.delete_many(filter).await
        } else {
            collection.delete_one(filter).await
        };
        Ok(result.map_err(|e| classify(&e))?.deleted_count)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError> {
        self.collection(collection)
            .distinct(field, filter)
            .await
            .map_err(|e| classify(&e))
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError> {
        let mut options = IndexOptions::default();
        options.name = Some(name.to_string());
        options.unique = Some(unique);
        let model = IndexModel::builder().keys(keys).options(options).build();

        let result = self
            .collection(collection)
            .create_index(model)
            .await
            .map_err(|e| classify(&e))?;
        debug!(collection, index = %result.index_name, "index ready");
        Ok(result.index_name)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError> {
        self.collection(collection)
            .drop()
            .await
            .map_err(|e| classify(&e))
    }
}
