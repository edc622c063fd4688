//! Retrying driver wrapper.
//!
//! [`Proxy`] forwards every operation to the wrapped driver and retries
//! those that fail with a transient error, so that a topology change during
//! a burst of writes does not surface to callers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use tracing::warn;

use crate::driver::{DocumentStream, Driver, DriverError, FindOptions};

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Base delay; the n-th retry waits `n * delay`.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

/// Runs `op`, retrying transient failures according to `policy`.
///
/// After the retries are exhausted the last error is returned unchanged.
pub async fn autoreconnect<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(error) if error.is_transient() && attempt < policy.retries => {
                attempt += 1;
                warn!(
                    attempt,
                    retries = policy.retries,
                    error = %error,
                    "transient storage error, retrying"
                );
                tokio::time::sleep(policy.delay * attempt).await;
            }
            result => return result,
        }
    }
}

/// A [`Driver`] that retries transient failures of the wrapped driver.
#[derive(Debug)]
pub struct Proxy<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: Driver> Proxy<D> {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped driver.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<D: Driver> Driver for Proxy<D> {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.insert_one(collection, document.clone())
        })
        .await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner
                .replace_one(collection, filter.clone(), replacement.clone())
        })
        .await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner
                .find_one(collection, filter.clone(), projection.clone())
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.find(collection, filter.clone(), options.clone())
        })
        .await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.count(collection, filter.clone(), skip, limit)
        })
        .await
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.delete(collection, filter.clone(), many)
        })
        .await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.distinct(collection, field, filter.clone())
        })
        .await
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError> {
        autoreconnect(&self.policy, || {
            self.inner.create_index(collection, name, keys.clone(), unique)
        })
        .await
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError> {
        autoreconnect(&self.policy, || self.inner.drop_collection(collection)).await
    }
}
