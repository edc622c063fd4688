//! Database handle threaded through managers, query sets and instances.

use std::sync::Arc;

use tracing::info;

use crate::driver::{Driver, MemoryDriver};
use crate::error::Result;
use crate::manager::Objects;
use crate::proxy::{Proxy, RetryPolicy};
use crate::schema::Schema;

/// A cheap, cloneable handle to a storage driver.
///
/// There is no process-wide connection; every manager and query set is
/// given the handle it should use.
#[derive(Debug, Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
}

impl Database {
    /// Wraps a driver.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Wraps a shared driver.
    pub fn from_arc(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Creates an in-memory database behind a retrying proxy.
    pub fn memory() -> Self {
        Self::new(Proxy::new(MemoryDriver::new(), RetryPolicy::default()))
    }

    /// Returns the driver.
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Returns the default manager of `schema` bound to this database.
    pub fn objects(&self, schema: &Arc<Schema>) -> Objects {
        Objects::new(schema.clone(), self.clone())
    }

    /// Drops the collection of `schema`.
    pub async fn drop_collection(&self, schema: &Schema) -> Result<()> {
        info!(collection = schema.collection(), "dropping collection");
        self.driver.drop_collection(schema.collection()).await?;
        Ok(())
    }
}
