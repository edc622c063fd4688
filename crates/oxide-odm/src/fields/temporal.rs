//! Date and time field types.
//!
//! Temporal values are kept natively in storage and travel as ISO-8601
//! strings over the wire.

use async_trait::async_trait;
use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc};

use super::{impl_options, Field, FieldContext, FieldOptions, Widget};
use crate::error::{ErrorKind, ValidationError};
use crate::value::Value;

/// Storage keeps millisecond precision; truncating up front keeps values
/// equal across a save/refresh cycle.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        })
}

/// A timestamp field.
///
/// With `auto_now` the value is refreshed on every save; with
/// `auto_now_on_create` it is filled once, before the first save.
#[derive(Debug, Clone)]
pub struct DateTimeField {
    /// Set to the current time on every save.
    pub auto_now: bool,
    /// Set to the current time on first save when unset.
    pub auto_now_on_create: bool,
    /// Field options.
    pub options: FieldOptions,
}

impl DateTimeField {
    /// Creates a new DateTimeField.
    pub fn new() -> Self {
        Self {
            auto_now: false,
            auto_now_on_create: false,
            options: FieldOptions::new(),
        }
    }

    /// Sets the auto_now option.
    #[must_use]
    pub fn auto_now(mut self, value: bool) -> Self {
        self.auto_now = value;
        self
    }

    /// Sets the auto_now_on_create option.
    #[must_use]
    pub fn auto_now_on_create(mut self, value: bool) -> Self {
        self.auto_now_on_create = value;
        self
    }

    fn parse(&self, value: &Value) -> Result<DateTime<Utc>, ValidationError> {
        let parsed = match value {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(date) => Some(date.and_time(NaiveTime::MIN).and_utc()),
            Value::String(s) => parse_datetime(s),
            Value::Int(millis) => DateTime::from_timestamp_millis(*millis),
            _ => None,
        };
        parsed
            .map(|dt| dt.trunc_subsecs(3))
            .ok_or_else(|| self.error(ErrorKind::Invalid, &[]))
    }
}

impl Default for DateTimeField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for DateTimeField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "datetime"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.parse(&value).map(Value::DateTime)
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        self.parse(value)
            .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
    }

    fn on_create(&self, value: Value) -> Value {
        if self.auto_now_on_create && value.is_null() {
            Value::DateTime(now())
        } else {
            value
        }
    }

    fn on_save(&self, value: Value) -> Value {
        if self.auto_now {
            Value::DateTime(now())
        } else {
            value
        }
    }

    fn default_widget(&self) -> Widget {
        Widget::input("datetime-local")
    }
}

/// A calendar date field.
#[derive(Debug, Clone)]
pub struct DateField {
    /// Field options.
    pub options: FieldOptions,
}

impl DateField {
    /// Creates a new DateField.
    pub fn new() -> Self {
        Self {
            options: FieldOptions::new(),
        }
    }

    fn parse(&self, value: &Value) -> Result<NaiveDate, ValidationError> {
        let parsed = match value {
            Value::Date(date) => Some(*date),
            Value::DateTime(dt) => Some(dt.date_naive()),
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date_naive())),
            _ => None,
        };
        parsed.ok_or_else(|| self.error(ErrorKind::Invalid, &[]))
    }
}

impl Default for DateField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for DateField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "date"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.parse(&value).map(Value::Date)
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        self.parse(value).map(|date| Value::Date(date).to_bson())
    }

    fn default_widget(&self) -> Widget {
        Widget::input("date")
    }
}

/// A wall-clock time field, stored as `HH:MM:SS[.fff]` text.
#[derive(Debug, Clone)]
pub struct TimeField {
    /// Field options.
    pub options: FieldOptions,
}

impl TimeField {
    /// Creates a new TimeField.
    pub fn new() -> Self {
        Self {
            options: FieldOptions::new(),
        }
    }

    fn parse(&self, value: &Value) -> Result<NaiveTime, ValidationError> {
        let parsed = match value {
            Value::Time(time) => Some(*time),
            Value::DateTime(dt) => Some(dt.time()),
            Value::String(s) => ["%H:%M:%S%.f", "%H:%M"]
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(s.trim(), format).ok()),
            _ => None,
        };
        parsed.ok_or_else(|| self.error(ErrorKind::Invalid, &[]))
    }
}

impl Default for TimeField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for TimeField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &'static str {
        "time"
    }

    async fn coerce(&self, value: Value, _cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.parse(&value).map(Value::Time)
    }

    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        self.parse(value).map(|time| Bson::String(time.to_string()))
    }

    fn default_widget(&self) -> Widget {
        Widget::input("time")
    }
}

impl_options!(DateTimeField, DateField, TimeField);
