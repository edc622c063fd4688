//! Document identity field.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::Bson;

use super::{impl_options, Field, FieldContext, FieldOptions};
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// The implicit `_id` field present first in every schema.
///
/// Read-only and optional; accepts an [`ObjectId`] or its 24-character hex
/// form.
#[derive(Debug, Clone)]
pub struct IdField {
    /// Field options.
    pub options: FieldOptions,
}

impl IdField {
    /// Creates a new IdField.
    pub fn new() -> Self {
        Self {
            options: FieldOptions::new().required(false).read_only(true),
        }
    }

    fn parse(&self, value: &Value) -> Result<ObjectId, ValidationError> {
        match value {
            Value::ObjectId(oid) => Ok(*oid),
            Value::String(hex) => {
                ObjectId::parse_str(hex).map_err(|_| self.error(ErrorKind::Invalid, &[]))
            }
            Value::Instance(instance) => instance
                .id()
                .ok_or_else(|| self.error(ErrorKind::Invalid, &[])),
            _ => Err(self.error(ErrorKind::Invalid, &[])),
        }
    }
}

impl Default for IdField {
    fn default() -> Self {
        Self::new()
    }
}

impl_options!(IdField);

#[async_trait]
impl Field for IdField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "id"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.parse(&value).map(Value::ObjectId)
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        self.parse(value).map(Bson::ObjectId)
    }
}
