//! Boolean field type.

use async_trait::async_trait;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// A boolean field.
///
/// Accepts booleans, `0`/`1`, and the usual textual spellings
/// (`true`/`false`, `yes`/`no`, `on`/`off`).
#[derive(Debug, Clone)]
pub struct BooleanField {
    /// Field options.
    pub options: FieldOptions,
}

impl BooleanField {
    /// Creates a new BooleanField.
    pub fn new() -> Self {
        Self {
            options: FieldOptions::new(),
        }
    }
}

impl Default for BooleanField {
    fn default() -> Self {
        Self::new()
    }
}

impl_options!(BooleanField);

#[async_trait]
impl Field for BooleanField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "boolean"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let parsed = match &value {
            Value::Bool(b) => Some(*b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        };

        parsed
            .map(Value::Bool)
            .ok_or_else(|| self.error(ErrorKind::Invalid, &[]))
    }

    fn default_widget(&self) -> Widget {
        Widget::checkbox()
    }
}
