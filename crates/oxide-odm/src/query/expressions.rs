//! Driver-native filter expressions.
//!
//! These build storage-level documents for [`QuerySet::raw`](crate::QuerySet::raw)
//! where the `field__op` grammar is not expressive enough.

use bson::{doc, Bson, Document};

use super::Lookup;

/// A storage-level value inserted into a filter verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Raw(pub Bson);

impl From<Raw> for Lookup {
    fn from(raw: Raw) -> Self {
        Self::Raw(raw.0)
    }
}

/// Matches documents satisfying any of `clauses`.
///
/// ```ignore
/// let qs = users.raw(or([doc! { "name": "alice" }, doc! { "age": { "$gt": 30 } }]));
/// ```
pub fn or(clauses: impl IntoIterator<Item = Document>) -> Document {
    let clauses: Vec<Bson> = clauses.into_iter().map(Bson::Document).collect();
    doc! { "$or": clauses }
}

/// Matches documents whose `key` matches `pattern`.
pub fn regex(key: &str, pattern: &str) -> Document {
    let mut filter = Document::new();
    filter.insert(key, doc! { "$regex": pattern });
    filter
}
