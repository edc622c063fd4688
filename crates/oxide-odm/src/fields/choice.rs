//! Choice field types.

use async_trait::async_trait;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::choices::Choices;
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// A field whose value must be one of a fixed set.
#[derive(Debug, Clone)]
pub struct ChoiceField {
    /// Allowed values.
    pub choices: Choices,
    /// Field options.
    pub options: FieldOptions,
}

impl ChoiceField {
    /// Creates a new ChoiceField.
    pub fn new(choices: Choices) -> Self {
        Self {
            choices,
            options: FieldOptions::new(),
        }
    }
}

#[async_trait]
impl Field for ChoiceField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "choice"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.choices.resolve(&value).cloned().ok_or_else(|| {
            self.error(ErrorKind::Choices, &[("choices", self.choices.describe())])
        })
    }

    fn default_widget(&self) -> Widget {
        Widget::select(self.choices.options())
    }
}

/// A list whose every element must be one of a fixed set.
#[derive(Debug, Clone)]
pub struct MultipleChoiceField {
    /// Allowed values.
    pub choices: Choices,
    /// Field options.
    pub options: FieldOptions,
}

impl MultipleChoiceField {
    /// Creates a new MultipleChoiceField.
    pub fn new(choices: Choices) -> Self {
        Self {
            choices,
            options: FieldOptions::new(),
        }
    }
}

#[async_trait]
impl Field for MultipleChoiceField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "multiple_choice"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let Value::Array(items) = value else {
            return Err(self.error(ErrorKind::Invalid, &[]));
        };

        items
            .iter()
            .map(|item| {
                self.choices.resolve(item).cloned().ok_or_else(|| {
                    self.error(ErrorKind::Choices, &[("choices", self.choices.describe())])
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn default_widget(&self) -> Widget {
        Widget::select(self.choices.options()).attr("multiple", "multiple")
    }
}

impl_options!(ChoiceField, MultipleChoiceField);
