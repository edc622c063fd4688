//! # oxide-odm
//!
//! A Django-like document mapper for Rust with lazy queries and async support.
//!
//! This crate provides:
//! - [`Schema`] for declarative, ordered model definitions
//! - Field types with validation, in [`fields`]
//! - [`Instance`] for documents in memory, with `save`/`refresh`/`delete`
//! - [`Manager`] for per-model access patterns
//! - [`QuerySet`] for lazy, chainable queries
//! - the [`Driver`](driver::Driver) seam, a retrying [`Proxy`] and an
//!   in-memory driver
//!
//! ## Quick Start
//!
//! ```ignore
//! use oxide_odm::fields::{FieldOptions, IntegerField, StringField};
//! use oxide_odm::{values, Database, Manager, Schema};
//!
//! async fn example() -> oxide_odm::Result<()> {
//!     let user = Schema::builder("User")
//!         .field("name", StringField::new().max_length(150))
//!         .field("age", IntegerField::new().options(FieldOptions::new().required(false)))
//!         .build()?;
//!
//!     let db = Database::memory();
//!     let users = db.objects(&user);
//!
//!     let alice = users.create(values! { "name" => "alice", "age" => 31 }).await?;
//!     assert!(alice.is_persisted());
//!
//!     // Get a specific user
//!     let alice = users.get("name", "alice").await?;
//!
//!     // Count users
//!     let count = users.count().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## QuerySet Operations
//!
//! Nothing reaches storage until a query set is consumed. Filters, sorts
//! and projections are checked against the schema at that point:
//!
//! ```ignore
//! let qs = users
//!     .filter("age__gte", 18)
//!     .filter("name__in", vec!["alice", "bob"])
//!     .order_by(&["-age"])
//!     .slice(..10);
//!
//! let adults = qs.fetch_all().await?;
//! let first = qs.first().await?;
//! let any = qs.exists().await?;
//! ```

mod choices;
pub mod conf;
mod database;
pub mod driver;
mod error;
pub mod fields;
mod manager;
mod model;
mod proxy;
pub mod query;
mod queryset;
mod schema;
mod value;

pub use choices::{Choice, Choices};
pub use conf::Settings;
pub use database::Database;
pub use error::{ErrorKind, OdmError, Result, ValidationError};
pub use manager::{Manager, Objects};
pub use model::Instance;
pub use proxy::{autoreconnect, Proxy, RetryPolicy};
pub use query::{Lookup, Raw};
pub use queryset::{
    Cursor, Documents, Instances, OrderBy, OrderDirection, QuerySet, RowContext, Shape,
};
pub use schema::{Schema, SchemaBuilder, ID_FIELD};
pub use value::Value;
