//! Numeric field types.

use async_trait::async_trait;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// `i64::MIN` and `i64::MAX + 1`, both exactly representable as `f64`.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// A 64-bit integer field with optional bounds.
///
/// Values equal to a bound pass; values beyond it fail. Integral floats and
/// numeric strings are accepted.
#[derive(Debug, Clone)]
pub struct IntegerField {
    /// Smallest accepted value.
    pub min_value: Option<i64>,
    /// Largest accepted value.
    pub max_value: Option<i64>,
    /// Field options.
    pub options: FieldOptions,
}

impl IntegerField {
    /// Creates a new IntegerField.
    pub fn new() -> Self {
        Self {
            min_value: None,
            max_value: None,
            options: FieldOptions::new(),
        }
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn min_value(mut self, value: i64) -> Self {
        self.min_value = Some(value);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn max_value(mut self, value: i64) -> Self {
        self.max_value = Some(value);
        self
    }

    fn parse(&self, value: &Value) -> Result<i64, ValidationError> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 && (I64_LOWER..I64_UPPER).contains(f) => {
                Ok(*f as i64)
            }
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| self.error(ErrorKind::Invalid, &[])),
            _ => Err(self.error(ErrorKind::Invalid, &[])),
        }
    }
}

impl Default for IntegerField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for IntegerField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "integer"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let number = self.parse(&value)?;

        if let Some(min) = self.min_value {
            if number < min {
                return Err(self.error(ErrorKind::MinValue, &[("min_value", min.to_string())]));
            }
        }
        if let Some(max) = self.max_value {
            if number > max {
                return Err(self.error(ErrorKind::MaxValue, &[("max_value", max.to_string())]));
            }
        }

        Ok(Value::Int(number))
    }

    fn db_serialize(&self, value: &Value) -> Result<bson::Bson, ValidationError> {
        match value {
            Value::Null => Ok(bson::Bson::Null),
            other => self.parse(other).map(bson::Bson::Int64),
        }
    }

    fn default_widget(&self) -> Widget {
        Widget::input("number")
    }
}

/// A double-precision float field with optional bounds.
#[derive(Debug, Clone)]
pub struct FloatField {
    /// Smallest accepted value.
    pub min_value: Option<f64>,
    /// Largest accepted value.
    pub max_value: Option<f64>,
    /// Field options.
    pub options: FieldOptions,
}

impl FloatField {
    /// Creates a new FloatField.
    pub fn new() -> Self {
        Self {
            min_value: None,
            max_value: None,
            options: FieldOptions::new(),
        }
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn min_value(mut self, value: f64) -> Self {
        self.min_value = Some(value);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn max_value(mut self, value: f64) -> Self {
        self.max_value = Some(value);
        self
    }

    fn parse(&self, value: &Value) -> Result<f64, ValidationError> {
        let number = match value {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_f64(),
        };
        number
            .filter(|f: &f64| f.is_finite())
            .ok_or_else(|| self.error(ErrorKind::Invalid, &[]))
    }
}

impl Default for FloatField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for FloatField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "float"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let number = self.parse(&value)?;

        if let Some(min) = self.min_value {
            if number < min {
                return Err(self.error(ErrorKind::MinValue, &[("min_value", min.to_string())]));
            }
        }
        if let Some(max) = self.max_value {
            if number > max {
                return Err(self.error(ErrorKind::MaxValue, &[("max_value", max.to_string())]));
            }
        }

        Ok(Value::Float(number))
    }

    fn db_serialize(&self, value: &Value) -> Result<bson::Bson, ValidationError> {
        match value {
            Value::Null => Ok(bson::Bson::Null),
            other => self.parse(other).map(bson::Bson::Double),
        }
    }

    fn default_widget(&self) -> Widget {
        Widget::input("number").attr("step", "any")
    }
}

impl_options!(IntegerField, FloatField);
