//! Text field kinds stored as BSON strings.

use std::net::IpAddr;

use async_trait::async_trait;
use bson::Bson;
use regex::Regex;

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// Length and pattern rules shared by the text field kinds.
#[derive(Debug, Clone, Default)]
struct TextRules {
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
}

impl TextRules {
    fn text<F: Field + ?Sized>(field: &F, value: Value) -> Result<String, ValidationError> {
        match value {
            Value::String(s) => Ok(s),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            _ => Err(field.error(ErrorKind::Invalid, &[])),
        }
    }

    /// Storage form of a value, as text.
    ///
    /// Filter values go through here too, so `name = 5` matches the `"5"`
    /// that validation stores.
    fn stored<F: Field + ?Sized>(field: &F, value: &Value) -> Result<Bson, ValidationError> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => Self::text(field, other.clone()).map(Bson::String),
        }
    }

    fn check<F: Field + ?Sized>(&self, field: &F, text: &str) -> Result<(), ValidationError> {
        let length = text.chars().count();

        if let Some(min) = self.min_length {
            if length < min {
                return Err(field.error(ErrorKind::MinLength, &[("min_length", min.to_string())]));
            }
        }
        if let Some(max) = self.max_length {
            if length > max {
                return Err(field.error(ErrorKind::MaxLength, &[("max_length", max.to_string())]));
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(text) {
                return Err(field.error(
                    ErrorKind::Pattern,
                    &[("pattern", pattern.as_str().to_string())],
                ));
            }
        }

        Ok(())
    }

    fn widget(&self, input_type: &str) -> Widget {
        let widget = Widget::input(input_type);
        match self.max_length {
            Some(max) => widget.attr("maxlength", max.to_string()),
            None => widget,
        }
    }
}

/// A text field with optional length bounds and pattern.
///
/// # Example
///
/// ```ignore
/// let name = StringField::new().min_length(3).max_length(150);
/// ```
#[derive(Debug, Clone)]
pub struct StringField {
    rules: TextRules,
    /// Field options.
    pub options: FieldOptions,
}

impl StringField {
    /// Creates a new StringField.
    pub fn new() -> Self {
        Self {
            rules: TextRules::default(),
            options: FieldOptions::new(),
        }
    }

    /// Sets the minimum length, in characters.
    #[must_use]
    pub fn min_length(mut self, length: usize) -> Self {
        self.rules.min_length = Some(length);
        self
    }

    /// Sets the maximum length, in characters.
    #[must_use]
    pub fn max_length(mut self, length: usize) -> Self {
        self.rules.max_length = Some(length);
        self
    }

    /// Requires values to match `pattern`.
    #[must_use]
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.rules.pattern = Some(pattern);
        self
    }
}

impl Default for StringField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for StringField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "string"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let text = TextRules::text(self, value)?;
        self.rules.check(self, &text)?;
        Ok(Value::String(text))
    }

    fn default_widget(&self) -> Widget {
        self.rules.widget("text")
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        TextRules::stored(self, value)
    }
}

/// A short label containing only letters, digits, hyphens and underscores.
#[derive(Debug, Clone)]
pub struct SlugField {
    rules: TextRules,
    /// Field options.
    pub options: FieldOptions,
}

impl SlugField {
    /// Creates a new SlugField.
    pub fn new() -> Self {
        Self {
            rules: TextRules {
                max_length: Some(50),
                ..TextRules::default()
            },
            options: FieldOptions::new(),
        }
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn max_length(mut self, length: usize) -> Self {
        self.rules.max_length = Some(length);
        self
    }
}

impl Default for SlugField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for SlugField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "slug"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let text = TextRules::text(self, value)?;
        let valid = !text.is_empty()
            && text
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(self.error(ErrorKind::Invalid, &[]));
        }
        self.rules.check(self, &text)?;
        Ok(Value::String(text))
    }

    fn default_widget(&self) -> Widget {
        self.rules.widget("text")
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        TextRules::stored(self, value)
    }
}

fn is_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// A hostname or IPv4/IPv6 address.
#[derive(Debug, Clone)]
pub struct HostField {
    rules: TextRules,
    /// Field options.
    pub options: FieldOptions,
}

impl HostField {
    /// Creates a new HostField.
    pub fn new() -> Self {
        Self {
            rules: TextRules {
                max_length: Some(253),
                ..TextRules::default()
            },
            options: FieldOptions::new(),
        }
    }
}

impl Default for HostField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for HostField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "host"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let text = TextRules::text(self, value)?;
        let trimmed = text.trim_start_matches('[').trim_end_matches(']');
        if trimmed.parse::<IpAddr>().is_err() && !is_hostname(&text) {
            return Err(self.error(ErrorKind::Invalid, &[]));
        }
        self.rules.check(self, &text)?;
        Ok(Value::String(text))
    }

    fn default_widget(&self) -> Widget {
        self.rules.widget("text")
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        TextRules::stored(self, value)
    }
}

/// An absolute `http` or `https` URL.
#[derive(Debug, Clone)]
pub struct UrlField {
    rules: TextRules,
    /// Field options.
    pub options: FieldOptions,
}

impl UrlField {
    /// Creates a new UrlField.
    pub fn new() -> Self {
        Self {
            rules: TextRules {
                max_length: Some(2048),
                ..TextRules::default()
            },
            options: FieldOptions::new(),
        }
    }
}

impl Default for UrlField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for UrlField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "url"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        let text = TextRules::text(self, value)?;
        let valid = url::Url::parse(&text).is_ok_and(|url| {
            matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
        });
        if !valid {
            return Err(self.error(ErrorKind::Invalid, &[]));
        }
        self.rules.check(self, &text)?;
        Ok(Value::String(text))
    }

    fn default_widget(&self) -> Widget {
        self.rules.widget("url")
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        TextRules::stored(self, value)
    }
}

impl_options!(StringField, SlugField, HostField, UrlField);
