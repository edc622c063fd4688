//! Storage driver seam.
//!
//! The mapper talks to storage only through [`Driver`]. Implementations live in
//! this crate ([`MemoryDriver`]) and in driver crates such as
//! `oxide-odm-mongodb`.

mod memory;

pub use memory::MemoryDriver;

use std::fmt;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;

/// Stream of raw documents produced by [`Driver::find`].
pub type DocumentStream = BoxStream<'static, Result<Document, DriverError>>;

/// Classification of driver failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Connection-level blip; the operation may succeed when retried.
    Transient,
    /// A unique index rejected the write.
    DuplicateKey {
        /// Name of the violated index, when the store reports it.
        index: Option<String>,
    },
    /// Any other failure.
    Other,
}

/// Error reported by a storage driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    /// The failure class.
    pub kind: DriverErrorKind,
    /// Driver-supplied description.
    pub message: String,
}

impl DriverError {
    /// Creates a retryable connection error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a duplicate-key error for `index`.
    pub fn duplicate_key(index: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::DuplicateKey { index },
            message: message.into(),
        }
    }

    /// Creates an unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            message: message.into(),
        }
    }

    /// Returns whether retrying may help.
    pub fn is_transient(&self) -> bool {
        self.kind == DriverErrorKind::Transient
    }
}

/// Options for [`Driver::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, `{field: 1 | -1}` in priority order.
    pub sort: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Inclusion projection, `{field: 1}`.
    pub projection: Option<Document>,
}

/// Async document-store handle.
///
/// Identity values generated by [`Driver::insert_one`] must be totally
/// ordered so that sorting by `_id` is stable.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Inserts a document and returns its generated identity.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError>;

    /// Replaces the first document matching `filter`, returning the matched count.
    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError>;

    /// Returns the first document matching `filter`.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError>;

    /// Opens a cursor over documents matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError>;

    /// Counts documents matching `filter` after applying `skip` and `limit`.
    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError>;

    /// Deletes documents matching `filter`, returning the deleted count.
    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError>;

    /// Returns the distinct values of `field` among documents matching `filter`.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError>;

    /// Creates an index and returns its name.
    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError>;

    /// Drops a collection and its indexes.
    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError>;
}

#[async_trait]
impl<D: Driver + ?Sized> Driver for std::sync::Arc<D> {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError> {
        (**self).insert_one(collection, document).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError> {
        (**self).replace_one(collection, filter, replacement).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError> {
        (**self).find_one(collection, filter, projection).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError> {
        (**self).find(collection, filter, options).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError> {
        (**self).count(collection, filter, skip, limit).await
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError> {
        (**self).delete(collection, filter, many).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError> {
        (**self).distinct(collection, field, filter).await
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError> {
        (**self).create_index(collection, name, keys, unique).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError> {
        (**self).drop_collection(collection).await
    }
}
