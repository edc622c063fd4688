//! QuerySet implementation for lazy, chainable document queries.
//!
//! QuerySets are lazy - they don't contact storage until a cursor is opened or
//! a method that evaluates the query (like `count()`, `get()`, `first()`) is
//! awaited. Filters are compiled and checked against the schema at that point,
//! once per query set value.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};
use std::sync::{Arc, OnceLock};

use bson::Document;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use tracing::debug;

use crate::database::Database;
use crate::driver::{DocumentStream, FindOptions};
use crate::error::{OdmError, Result};
use crate::model::Instance;
use crate::query::{compile, Lookup};
use crate::schema::{Schema, ID_FIELD};
use crate::value::Value;

/// Sort direction of one key, stored as `1` or `-1` in the sort document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Smallest first (`1`).
    Asc,
    /// Largest first (`-1`).
    Desc,
}

impl OrderDirection {
    /// Returns the value used in a storage sort document.
    pub fn sign(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// One entry of a query set's sort document, `{field: 1 | -1}`.
///
/// The field is not checked on construction. [`QuerySet::sorts`] and the
/// executing methods reject names the schema does not define with
/// [`OdmError::InvalidQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Schema field name; `_id` sorts by identity.
    pub field: String,
    /// Direction of this key.
    pub direction: OrderDirection,
}

impl OrderBy {
    fn new(field: &str, direction: OrderDirection) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }

    /// Sorts `field` ascending.
    pub fn asc(field: &str) -> Self {
        Self::new(field, OrderDirection::Asc)
    }

    /// Sorts `field` descending.
    pub fn desc(field: &str) -> Self {
        Self::new(field, OrderDirection::Desc)
    }

    /// Reads a sort key as given to [`QuerySet::order_by`]: `"age"` sorts
    /// by `{age: 1}`, `"-age"` by `{age: -1}`.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self::new(field, OrderDirection::Desc),
            None => Self::new(key, OrderDirection::Asc),
        }
    }
}

/// What a row is turned into once it leaves storage.
#[derive(Debug, Clone)]
pub struct RowContext {
    schema: Arc<Schema>,
    db: Database,
    raw_fields: Arc<[String]>,
}

/// Result shape of a [`QuerySet`].
pub trait Shape: Send + Sync + 'static {
    /// The row type yielded by cursors.
    type Row: Send + 'static;

    /// Converts one stored document into a row.
    fn shape(cx: RowContext, document: Document) -> BoxFuture<'static, Result<Self::Row>>;
}

/// Rows are typed model instances.
#[derive(Debug, Clone, Copy)]
pub struct Instances;

impl Shape for Instances {
    type Row = Instance;

    fn shape(cx: RowContext, document: Document) -> BoxFuture<'static, Result<Instance>> {
        Box::pin(async move {
            Ok(Instance::from_db(cx.schema, cx.db, document, &cx.raw_fields).await)
        })
    }
}

/// Rows are the stored documents, untouched.
#[derive(Debug, Clone, Copy)]
pub struct Documents;

impl Shape for Documents {
    type Row = Document;

    fn shape(_cx: RowContext, document: Document) -> BoxFuture<'static, Result<Document>> {
        Box::pin(futures::future::ready(Ok(document)))
    }
}

/// A lazy, chainable query over one collection.
///
/// Every builder consumes the query set and returns a new one; cloning gives
/// an independent branch that recompiles its filter on first use.
///
/// # Example
///
/// ```ignore
/// let adults = db
///     .objects(&user)
///     .filter("age__gte", 18)
///     .order_by(&["-age", "name"])
///     .slice(..10);
///
/// let mut cursor = adults.cursor().await?;
/// while let Some(user) = cursor.next().await? {
///     println!("{}", user.get("name")?);
/// }
/// ```
pub struct QuerySet<S: Shape = Instances> {
    schema: Arc<Schema>,
    db: Database,
    /// User-level lookups, compiled lazily
    lookups: IndexMap<String, Lookup>,
    /// Driver-native filter entries, merged last
    raw: Document,
    offset: u64,
    limit: Option<u64>,
    order_by: Vec<OrderBy>,
    /// Fields to fetch (None = all)
    only: Option<Vec<String>>,
    /// Fields left in storage form
    raw_fields: Vec<String>,
    compiled: OnceLock<Document>,
    _shape: PhantomData<fn() -> S>,
}

// Manual Clone implementation so branches never share the compiled filter
impl<S: Shape> Clone for QuerySet<S> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            db: self.db.clone(),
            lookups: self.lookups.clone(),
            raw: self.raw.clone(),
            offset: self.offset,
            limit: self.limit,
            order_by: self.order_by.clone(),
            only: self.only.clone(),
            raw_fields: self.raw_fields.clone(),
            compiled: OnceLock::new(),
            _shape: PhantomData,
        }
    }
}

impl<S: Shape> fmt::Debug for QuerySet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.schema.name())
            .field("lookups", &self.lookups)
            .field("raw", &self.raw)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("order_by", &self.order_by)
            .field("only", &self.only)
            .field("raw_fields", &self.raw_fields)
            .finish_non_exhaustive()
    }
}

impl QuerySet<Instances> {
    /// Creates a query set over every document of `schema`.
    pub fn new(schema: Arc<Schema>, db: Database) -> Self {
        Self {
            schema,
            db,
            lookups: IndexMap::new(),
            raw: Document::new(),
            offset: 0,
            limit: None,
            order_by: Vec::new(),
            only: None,
            raw_fields: Vec::new(),
            compiled: OnceLock::new(),
            _shape: PhantomData,
        }
    }
}

impl<S: Shape> QuerySet<S> {
    fn reshape<T: Shape>(self) -> QuerySet<T> {
        QuerySet {
            schema: self.schema,
            db: self.db,
            lookups: self.lookups,
            raw: self.raw,
            offset: self.offset,
            limit: self.limit,
            order_by: self.order_by,
            only: self.only,
            raw_fields: self.raw_fields,
            compiled: OnceLock::new(),
            _shape: PhantomData,
        }
    }

    fn touched(mut self) -> Self {
        self.compiled = OnceLock::new();
        self
    }

    /// Returns the schema being queried.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns an independent copy of this query set.
    #[must_use]
    pub fn all(&self) -> Self {
        self.clone()
    }

    /// Adds a lookup. A later lookup on the same key replaces the earlier one.
    ///
    /// Keys are `field`, `field__op` or driver-native `$op`; they are only
    /// checked when the query runs.
    #[must_use]
    pub fn filter(mut self, key: &str, value: impl Into<Lookup>) -> Self {
        self.lookups.insert(key.to_string(), value.into());
        self.touched()
    }

    /// Adds several lookups at once.
    #[must_use]
    pub fn filter_many<I, K, V>(mut self, lookups: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Lookup>,
    {
        for (key, value) in lookups {
            self.lookups.insert(key.into(), value.into());
        }
        self.touched()
    }

    /// Merges driver-native filter entries, verbatim.
    #[must_use]
    pub fn raw(mut self, filter: Document) -> Self {
        for (key, value) in filter {
            self.raw.insert(key, value);
        }
        self.touched()
    }

    /// Replaces the sort keys, e.g. `&["-age", "name"]`; checked when read.
    #[must_use]
    pub fn order_by(mut self, keys: &[&str]) -> Self {
        self.order_by = keys.iter().map(|key| OrderBy::parse(key)).collect();
        self
    }

    /// Restricts the fetched fields; the others read back as their defaults.
    #[must_use]
    pub fn only(mut self, fields: &[&str]) -> Self {
        self.only = Some(fields.iter().map(ToString::to_string).collect());
        self
    }

    /// Yields the stored documents instead of instances.
    #[must_use]
    pub fn values(self) -> QuerySet<Documents> {
        self.reshape()
    }

    /// Leaves the given fields in storage form on returned instances.
    #[must_use]
    pub fn raw_fields(mut self, fields: &[&str]) -> Self {
        self.raw_fields = fields.iter().map(ToString::to_string).collect();
        self
    }

    /// Narrows the result window, relative to the current one.
    ///
    /// `slice(a..b)` skips `a` rows and yields at most `b - a`; open bounds
    /// leave that side unchanged.
    #[must_use]
    pub fn slice(mut self, range: impl RangeBounds<u64>) -> Self {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => Some(end.saturating_add(1)),
            Bound::Excluded(&end) => Some(end),
            Bound::Unbounded => None,
        };

        let remaining = self.limit.map(|limit| limit.saturating_sub(start));
        let window = end.map(|end| end.saturating_sub(start));
        self.limit = match (remaining, window) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.offset = self.offset.saturating_add(start);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the maximum number of rows.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the storage filter, compiling it on first call.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidQuery`] for unknown fields or operators and for
    /// values the target field cannot serialize.
    pub fn query(&self) -> Result<&Document> {
        if let Some(query) = self.compiled.get() {
            return Ok(query);
        }
        let query = compile(&self.schema, &self.lookups, &self.raw)?;
        Ok(self.compiled.get_or_init(|| query))
    }

    /// Returns the sort specification, checked against the schema.
    pub fn sorts(&self) -> Result<Vec<OrderBy>> {
        for order in &self.order_by {
            self.check_field(&order.field, "sort")?;
        }
        Ok(self.order_by.clone())
    }

    fn check_field(&self, name: &str, role: &str) -> Result<()> {
        if self.schema.has_field(name) {
            Ok(())
        } else {
            Err(OdmError::InvalidQuery(format!(
                "cannot {role} on unknown field `{name}` of {}",
                self.schema.name()
            )))
        }
    }

    fn find_options(&self) -> Result<FindOptions> {
        let sorts = self.sorts()?;
        let sort = (!sorts.is_empty()).then(|| {
            sorts
                .iter()
                .map(|order| (order.field.clone(), order.direction.sign().into()))
                .collect::<Document>()
        });

        let projection = match &self.only {
            Some(fields) => {
                let mut projection = Document::new();
                projection.insert(ID_FIELD, 1);
                for name in fields {
                    self.check_field(name, "project")?;
                    projection.insert(name.clone(), 1);
                }
                Some(projection)
            }
            None => None,
        };

        Ok(FindOptions {
            sort,
            skip: (self.offset > 0).then_some(self.offset),
            limit: self.limit,
            projection,
        })
    }

    fn row_context(&self) -> RowContext {
        RowContext {
            schema: self.schema.clone(),
            db: self.db.clone(),
            raw_fields: self.raw_fields.clone().into(),
        }
    }

    /// Opens a cursor over the matching rows.
    pub async fn cursor(&self) -> Result<Cursor<S>> {
        let query = self.query()?.clone();
        let options = self.find_options()?;
        let cx = self.row_context();

        if self.limit == Some(0) {
            return Ok(Cursor::new(futures::stream::empty().boxed(), cx));
        }

        let collection = self.schema.collection();
        debug!(collection, filter = %query, ?options, "find");
        let stream = self.db.driver().find(collection, query, options).await?;
        Ok(Cursor::new(stream, cx))
    }

    /// Returns the matching rows as a stream.
    pub async fn stream(&self) -> Result<BoxStream<'static, Result<S::Row>>> {
        Ok(self.cursor().await?.into_stream())
    }

    /// Fetches every matching row.
    pub async fn fetch_all(&self) -> Result<Vec<S::Row>> {
        let mut cursor = self.cursor().await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Counts the rows inside the current window.
    pub async fn count(&self) -> Result<u64> {
        let query = self.query()?.clone();
        if self.limit == Some(0) {
            return Ok(0);
        }

        let collection = self.schema.collection();
        debug!(collection, filter = %query, "count");
        let skip = (self.offset > 0).then_some(self.offset);
        Ok(self.db.driver().count(collection, query, skip, self.limit).await?)
    }

    /// Returns whether any row matches.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.clone().slice(..1).count().await? > 0)
    }

    /// Returns the first matching row.
    ///
    /// # Errors
    ///
    /// [`OdmError::DoesNotExist`] when nothing matches.
    pub async fn get(&self) -> Result<S::Row> {
        let narrowed = self.clone().slice(..1);
        let mut cursor = narrowed.cursor().await?;
        cursor.next().await?.ok_or_else(|| OdmError::DoesNotExist {
            model: self.schema.name().to_string(),
        })
    }

    /// Shorthand for `filter(key, value).get()`.
    pub async fn get_by(self, key: &str, value: impl Into<Lookup>) -> Result<S::Row> {
        self.filter(key, value).get().await
    }

    /// Returns the row at `index` of the current window.
    pub async fn nth(&self, index: u64) -> Result<S::Row> {
        self.clone()
            .slice(index..index.saturating_add(1))
            .get()
            .await
    }

    /// Returns the row with the smallest identity.
    pub async fn first(&self) -> Result<S::Row> {
        self.clone().order_by(&[ID_FIELD]).get().await
    }

    /// Returns the row with the largest identity.
    pub async fn last(&self) -> Result<S::Row> {
        self.clone().order_by(&["-_id"]).get().await
    }

    /// Returns the distinct stored values of `field` among matching rows.
    pub async fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        self.check_field(field, "distinct")?;
        let query = self.query()?.clone();
        let collection = self.schema.collection();
        debug!(collection, field, filter = %query, "distinct");
        let values = self.db.driver().distinct(collection, field, query).await?;
        Ok(values.into_iter().map(Value::from_bson).collect())
    }

    /// Deletes every matching document, returning how many were removed.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidQuery`] on a sliced query set, which storage
    /// cannot delete from.
    pub async fn delete(&self) -> Result<u64> {
        if self.offset > 0 || self.limit.is_some() {
            return Err(OdmError::InvalidQuery(
                "cannot delete from a sliced query set".to_string(),
            ));
        }
        let query = self.query()?.clone();
        let collection = self.schema.collection();
        debug!(collection, filter = %query, "delete");
        Ok(self.db.driver().delete(collection, query, true).await?)
    }
}

/// Pull-based cursor over the rows of a query set.
///
/// `next` yields `Ok(Some(row))` until the result set is exhausted, then
/// `Ok(None)`.
pub struct Cursor<S: Shape> {
    stream: DocumentStream,
    cx: RowContext,
    _shape: PhantomData<fn() -> S>,
}

impl<S: Shape> Cursor<S> {
    fn new(stream: DocumentStream, cx: RowContext) -> Self {
        Self {
            stream,
            cx,
            _shape: PhantomData,
        }
    }

    /// Fetches the next row.
    pub async fn next(&mut self) -> Result<Option<S::Row>> {
        match self.stream.next().await {
            Some(Ok(document)) => S::shape(self.cx.clone(), document).await.map(Some),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Converts the cursor into a stream of rows.
    pub fn into_stream(self) -> BoxStream<'static, Result<S::Row>> {
        let cx = self.cx;
        self.stream
            .map_err(OdmError::from)
            .and_then(move |document| S::shape(cx.clone(), document))
            .boxed()
    }
}

impl<S: Shape> fmt::Debug for Cursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("model", &self.cx.schema.name())
            .finish_non_exhaustive()
    }
}
