//! In-process document store.
//!
//! Implements enough of the MongoDB query language to run the mapper end to
//! end without a server: equality, comparison and membership operators,
//! logical combinators, multi-key sorting, skip/limit, inclusion projection,
//! and unique indexes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::stream::{self, StreamExt};
use regex::RegexBuilder;

use super::{DocumentStream, Driver, DriverError, FindOptions};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct Index {
    name: String,
    keys: Vec<String>,
    unique: bool,
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<Index>,
}

impl Collection {
    fn check_unique(&self, candidate: &Document) -> Result<(), DriverError> {
        let id = candidate.get("_id");

        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index_key(candidate, &index.keys);
            let clash = self
                .documents
                .iter()
                .filter(|doc| doc.get("_id") != id)
                .any(|doc| index_key(doc, &index.keys) == key);

            if clash {
                return Err(DriverError::duplicate_key(
                    Some(index.name.clone()),
                    format!("duplicate key error index: {}", index.name),
                ));
            }
        }

        Ok(())
    }

    fn matching(&self, filter: &Document) -> Result<Vec<&Document>, DriverError> {
        let mut found = Vec::new();
        for doc in &self.documents {
            if matches(doc, filter)? {
                found.push(doc);
            }
        }
        Ok(found)
    }
}

/// Thread-safe in-memory [`Driver`].
#[derive(Debug, Default)]
pub struct MemoryDriver {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryDriver {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents stored in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .map(|collections| collections.get(collection).map_or(0, |c| c.documents.len()))
            .unwrap_or(0)
    }

    /// Returns the names of indexes on `collection`.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.lock()
            .map(|collections| {
                collections.get(collection).map_or_else(Vec::new, |c| {
                    c.indexes.iter().map(|index| index.name.clone()).collect()
                })
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Collection>>, DriverError> {
        self.collections
            .lock()
            .map_err(|_| DriverError::other("memory store lock poisoned"))
    }
}

/// Generates monotonically increasing identities.
fn next_object_id() -> ObjectId {
    let seq = SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
    let seconds = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);

    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());
    bytes[4..].copy_from_slice(&seq.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DriverError> {
        let mut collections = self.lock()?;
        let target = collections.entry(collection.to_string()).or_default();

        let id = document
            .get("_id")
            .filter(|id| !matches!(id, Bson::Null))
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(next_object_id()));

        let mut stored = Document::new();
        stored.insert("_id", id.clone());
        for (key, value) in document {
            if key != "_id" {
                stored.insert(key, value);
            }
        }

        if target.documents.iter().any(|doc| doc.get("_id") == Some(&id)) {
            return Err(DriverError::duplicate_key(
                Some("_id_".to_string()),
                "duplicate key error index: _id_",
            ));
        }
        target.check_unique(&stored)?;
        target.documents.push(stored);

        Ok(id)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<u64, DriverError> {
        let mut collections = self.lock()?;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut position = None;
        for (i, doc) in target.documents.iter().enumerate() {
            if matches(doc, &filter)? {
                position = Some(i);
                break;
            }
        }
        let Some(position) = position else {
            return Ok(0);
        };

        let mut stored = Document::new();
        if let Some(id) = target.documents[position].get("_id") {
            stored.insert("_id", id.clone());
        }
        for (key, value) in replacement {
            if key != "_id" {
                stored.insert(key, value);
            }
        }

        target.check_unique(&stored)?;
        target.documents[position] = stored;

        Ok(1)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DriverError> {
        let collections = self.lock()?;
        let Some(target) = collections.get(collection) else {
            return Ok(None);
        };

        Ok(target
            .matching(&filter)?
            .first()
            .map(|doc| project(doc, projection.as_ref())))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<DocumentStream, DriverError> {
        let collections = self.lock()?;
        let mut found: Vec<Document> = match collections.get(collection) {
            Some(target) => target.matching(&filter)?.into_iter().cloned().collect(),
            None => Vec::new(),
        };
        drop(collections);

        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| compare_by_sort(a, b, sort));
        }

        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match options.limit {
            Some(0) | None => usize::MAX,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        };

        let documents: Vec<Result<Document, DriverError>> = found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| Ok(project(&doc, options.projection.as_ref())))
            .collect();

        Ok(stream::iter(documents).boxed())
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u64, DriverError> {
        let collections = self.lock()?;
        let total = match collections.get(collection) {
            Some(target) => target.matching(&filter)?.len() as u64,
            None => 0,
        };

        let remaining = total.saturating_sub(skip.unwrap_or(0));
        Ok(match limit {
            Some(0) | None => remaining,
            Some(n) => remaining.min(n),
        })
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, DriverError> {
        let mut collections = self.lock()?;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(target.documents.len());
        let mut deleted = 0;
        for doc in target.documents.drain(..) {
            if (many || deleted == 0) && matches(&doc, &filter)? {
                deleted += 1;
            } else {
                kept.push(doc);
            }
        }
        target.documents = kept;

        Ok(deleted)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, DriverError> {
        let collections = self.lock()?;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut values: Vec<Bson> = Vec::new();
        for doc in target.matching(&filter)? {
            let candidates = match lookup(doc, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for candidate in candidates {
                if !values.iter().any(|seen| equals(seen, &candidate)) {
                    values.push(candidate);
                }
            }
        }

        Ok(values)
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String, DriverError> {
        let mut collections = self.lock()?;
        let target = collections.entry(collection.to_string()).or_default();

        if target.indexes.iter().any(|index| index.name == name) {
            return Ok(name.to_string());
        }

        let index = Index {
            name: name.to_string(),
            keys: keys.keys().cloned().collect(),
            unique,
        };

        if unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for doc in &target.documents {
                let key = index_key(doc, &index.keys);
                if seen.contains(&key) {
                    return Err(DriverError::duplicate_key(
                        Some(index.name),
                        "existing documents violate the unique index",
                    ));
                }
                seen.push(key);
            }
        }

        target.indexes.push(index);
        Ok(name.to_string())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DriverError> {
        self.lock()?.remove(collection);
        Ok(())
    }
}

fn index_key(doc: &Document, keys: &[String]) -> Vec<Bson> {
    keys.iter()
        .map(|key| lookup(doc, key).cloned().unwrap_or(Bson::Null))
        .collect()
}

/// Resolves a dotted path inside a document.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn project(doc: &Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection else {
        return doc.clone();
    };

    let keep_id = !matches!(
        projection.get("_id"),
        Some(Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
    );

    doc.iter()
        .filter(|(key, _)| {
            if key.as_str() == "_id" {
                keep_id
            } else {
                projection.contains_key(key.as_str())
            }
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Evaluates a filter document against a stored document.
pub(crate) fn matches(doc: &Document, filter: &Document) -> Result<bool, DriverError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$or" => any_clause(doc, condition)?,
            "$and" => all_clauses(doc, condition)?,
            "$nor" => !any_clause(doc, condition)?,
            op if op.starts_with('$') => {
                return Err(DriverError::other(format!("unsupported operator {op}")));
            }
            path => matches_field(lookup(doc, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses(condition: &Bson) -> Result<Vec<&Document>, DriverError> {
    let Bson::Array(items) = condition else {
        return Err(DriverError::other("logical operators take an array"));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(DriverError::other("logical operator clauses must be documents")),
        })
        .collect()
}

fn any_clause(doc: &Document, condition: &Bson) -> Result<bool, DriverError> {
    for clause in clauses(condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all_clauses(doc: &Document, condition: &Bson) -> Result<bool, DriverError> {
    for clause in clauses(condition)? {
        if !matches(doc, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_map(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(doc) if !doc.is_empty() && doc.keys().all(|key| key.starts_with('$')) => {
            Some(doc)
        }
        _ => None,
    }
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool, DriverError> {
    let Some(operators) = is_operator_map(condition) else {
        return Ok(matches_eq(value, condition));
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => matches_eq(value, operand),
            "$ne" => !matches_eq(value, operand),
            "$gt" => matches_cmp(value, operand, Ordering::is_gt),
            "$gte" => matches_cmp(value, operand, Ordering::is_ge),
            "$lt" => matches_cmp(value, operand, Ordering::is_lt),
            "$lte" => matches_cmp(value, operand, Ordering::is_le),
            "$in" => operand_items(op, operand)?
                .iter()
                .any(|item| matches_eq(value, item)),
            "$nin" => !operand_items(op, operand)?
                .iter()
                .any(|item| matches_eq(value, item)),
            "$all" => match value {
                Some(Bson::Array(items)) => operand_items(op, operand)?
                    .iter()
                    .all(|wanted| items.iter().any(|item| equals(item, wanted))),
                _ => false,
            },
            "$exists" => {
                let wanted = !matches!(
                    operand,
                    Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0)
                );
                value.is_some() == wanted
            }
            "$size" => match (value, as_i64(operand)) {
                (Some(Bson::Array(items)), Some(size)) => items.len() as i64 == size,
                _ => false,
            },
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                matches_regex(value, operand, options)?
            }
            "$options" => true,
            other => return Err(DriverError::other(format!("unsupported operator {other}"))),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn operand_items<'a>(op: &str, operand: &'a Bson) -> Result<&'a [Bson], DriverError> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(DriverError::other(format!("{op} needs an array"))),
    }
}

fn matches_eq(value: Option<&Bson>, condition: &Bson) -> bool {
    match (value, condition) {
        (None | Some(Bson::Null), Bson::Null) => true,
        (None, _) => false,
        (Some(Bson::Array(items)), _) => {
            equals(&Bson::Array(items.clone()), condition)
                || items.iter().any(|item| equals(item, condition))
        }
        (Some(value), _) => equals(value, condition),
    }
}

fn matches_cmp(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, operand).is_some_and(accept)),
        Some(value) => compare(value, operand).is_some_and(accept),
        None => false,
    }
}

fn matches_regex(value: Option<&Bson>, operand: &Bson, options: &str) -> Result<bool, DriverError> {
    let (pattern, options) = match operand {
        Bson::String(pattern) => (pattern.as_str(), options.to_string()),
        Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.clone()),
        _ => return Err(DriverError::other("$regex needs a string pattern")),
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| DriverError::other(format!("invalid $regex: {e}")))?;

    Ok(match value {
        Some(Bson::String(s)) => regex.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Numeric-aware equality.
fn equals(a: &Bson, b: &Bson) -> bool {
    match (as_i64(a), as_i64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => match (a, b) {
                (Bson::Array(x), Bson::Array(y)) => {
                    x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equals(l, r))
                }
                _ => a == b,
            },
        },
    }
}

/// Orders two values of the same type class; `None` when incomparable.
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Canonical BSON type order used when sorting mixed values.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null | Bson::Undefined) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (key, direction) in sort {
        let left = lookup(a, key);
        let right = lookup(b, key);

        let ordering = type_rank(left).cmp(&type_rank(right)).then_with(|| {
            match (left, right) {
                (Some(l), Some(r)) => compare(l, r).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        });

        let ordering = if as_i64(direction).is_some_and(|d| d < 0) {
            ordering.reverse()
        } else {
            ordering
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    #[test]
    fn test_equality_and_operators() {
        let doc = doc! { "name": "alice", "age": 30_i64, "tags": ["a", "b"] };

        assert!(matches(&doc, &doc! { "name": "alice" }).unwrap());
        assert!(matches(&doc, &doc! { "age": 30_i32 }).unwrap());
        assert!(matches(&doc, &doc! { "tags": "a" }).unwrap());
        assert!(matches(&doc, &doc! { "age": { "$gte": 30, "$lt": 31.5 } }).unwrap());
        assert!(!matches(&doc, &doc! { "age": { "$gt": 30 } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$in": ["bob", "alice"] } }).unwrap());
        assert!(matches(&doc, &doc! { "missing": null }).unwrap());
        assert!(matches(&doc, &doc! { "missing": { "$exists": false } }).unwrap());
        assert!(matches(&doc, &doc! { "tags": { "$all": ["b", "a"], "$size": 2 } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$regex": "^AL", "$options": "i" } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = doc! { "name": "alice", "age": 30_i64 };

        assert!(matches(&doc, &doc! { "$or": [{ "name": "bob" }, { "age": 30 }] }).unwrap());
        assert!(!matches(&doc, &doc! { "$and": [{ "name": "bob" }, { "age": 30 }] }).unwrap());
        assert!(matches(&doc, &doc! { "$nor": [{ "name": "bob" }] }).unwrap());
        assert!(matches(&doc, &doc! { "$where": "1" }).is_err());
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit_projection() {
        let driver = MemoryDriver::new();
        for (name, age) in [("c", 3_i64), ("a", 1), ("b", 2)] {
            driver
                .insert_one("people", doc! { "name": name, "age": age })
                .await
                .unwrap();
        }

        let options = FindOptions {
            sort: Some(doc! { "name": -1 }),
            skip: Some(1),
            limit: Some(1),
            projection: Some(doc! { "name": 1 }),
        };
        let docs: Vec<Document> = driver
            .find("people", doc! {}, options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("name").unwrap(), "b");
        assert!(docs[0].contains_key("_id"));
        assert!(!docs[0].contains_key("age"));
    }

    #[tokio::test]
    async fn test_generated_ids_are_ordered() {
        let driver = MemoryDriver::new();
        let first = driver.insert_one("c", doc! {}).await.unwrap();
        let second = driver.insert_one("c", doc! {}).await.unwrap();
        assert_eq!(compare(&first, &second), Some(Ordering::Less));
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let driver = MemoryDriver::new();
        driver
            .create_index("c", "key", doc! { "key": 1 }, true)
            .await
            .unwrap();
        driver.insert_one("c", doc! { "key": "x" }).await.unwrap();

        let err = driver.insert_one("c", doc! { "key": "x" }).await.unwrap_err();
        assert_eq!(
            err.kind,
            super::super::DriverErrorKind::DuplicateKey {
                index: Some("key".to_string())
            }
        );
        assert_eq!(driver.len("c"), 1);
    }

    #[tokio::test]
    async fn test_count_applies_skip_and_limit() {
        let driver = MemoryDriver::new();
        for i in 0..10_i64 {
            driver.insert_one("c", doc! { "i": i }).await.unwrap();
        }

        assert_eq!(driver.count("c", doc! {}, Some(5), Some(3)).await.unwrap(), 3);
        assert_eq!(driver.count("c", doc! {}, Some(8), Some(5)).await.unwrap(), 2);
        assert_eq!(
            driver
                .count("c", doc! { "i": { "$lt": 4 } }, None, None)
                .await
                .unwrap(),
            4
        );
    }
}
