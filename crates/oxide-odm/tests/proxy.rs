//! Retrying proxy in front of a driver that drops connections.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use oxide_odm::driver::{
    DocumentStream, Driver, DriverError, DriverErrorKind, FindOptions, MemoryDriver,
};
use oxide_odm::{values, Database, Manager, OdmError, Proxy, RetryPolicy};

/// Fails the next `failures` inserts and counts with `error`.
#[derive(Debug)]
struct Flaky {
    inner: MemoryDriver,
    failures: AtomicU32,
    calls: AtomicU32,
    error: DriverError,
}

impl Flaky {
    fn new(failures: u32, error: DriverError) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryDriver::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            error,
        })
    }

    fn trip(&self) -> Result<(), DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        Ok(())
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for Flaky {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError> {
        self.trip()?;
        self.inner.insert_one(collection, document).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError> {
        self.inner.replace_one(collection, filter, replacement).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError> {
        self.inner.find_one(collection, filter, projection).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError> {
        self.inner.find(collection, filter, options).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError> {
        self.trip()?;
        self.inner.count(collection, filter, skip, limit).await
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError> {
        self.inner.delete(collection, filter, many).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError> {
        self.inner.distinct(collection, field, filter).await
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError> {
        self.inner.create_index(collection, name, keys, unique).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError> {
        self.inner.drop_collection(collection).await
    }
}

fn behind_proxy(driver: &Arc<Flaky>, retries: u32) -> Database {
    Database::new(Proxy::new(
        driver.clone(),
        RetryPolicy::new(retries, Duration::from_millis(1)),
    ))
}

#[tokio::test]
async fn test_create_survives_dropped_connections() {
    let user = common::user_schema();
    let flaky = Flaky::new(2, DriverError::transient("connection reset"));
    let db = behind_proxy(&flaky, 3);

    let alice = db
        .objects(&user)
        .create(values! { "name" => "alice" })
        .await
        .unwrap();

    assert!(alice.is_persisted());
    assert_eq!(flaky.calls(), 3);
    assert_eq!(db.objects(&user).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_original_error() {
    let user = common::user_schema();
    let flaky = Flaky::new(10, DriverError::transient("connection reset"));
    let db = behind_proxy(&flaky, 2);

    let err = db.objects(&user).count().await.unwrap_err();
    match err {
        OdmError::Driver(error) => {
            assert_eq!(error.kind, DriverErrorKind::Transient);
            assert_eq!(error.message, "connection reset");
        }
        other => panic!("Expected driver error, got {other:?}"),
    }
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test]
async fn test_permanent_errors_fail_fast() {
    let user = common::user_schema();
    let flaky = Flaky::new(1, DriverError::other("not authorized"));
    let db = behind_proxy(&flaky, 5);

    let err = db.objects(&user).count().await.unwrap_err();
    assert!(matches!(err, OdmError::Driver(ref e) if !e.is_transient()));
    assert_eq!(flaky.calls(), 1);

    assert_eq!(db.objects(&user).count().await.unwrap(), 0);
    assert_eq!(flaky.calls(), 2);
}
