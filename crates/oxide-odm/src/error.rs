//! Error types for the document mapper.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::driver::DriverError;
use crate::schema::Schema;

/// Machine-checkable kind of a field-level validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The value has the wrong shape or format.
    Invalid,
    /// A required value is missing.
    Required,
    /// A string is shorter than allowed.
    MinLength,
    /// A string is longer than allowed.
    MaxLength,
    /// A number is below the lower bound.
    MinValue,
    /// A number is above the upper bound.
    MaxValue,
    /// A value is outside the allowed choice set.
    Choices,
    /// A string does not match the field pattern.
    Pattern,
    /// Another persisted document already holds the value.
    Unique,
    /// The referenced document does not exist or is not persisted.
    ForeignKey,
    /// A read-only field was explicitly assigned.
    ReadOnly,
}

impl ErrorKind {
    /// Returns the stable code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Required => "required",
            Self::MinLength => "min_length",
            Self::MaxLength => "max_length",
            Self::MinValue => "min_value",
            Self::MaxValue => "max_value",
            Self::Choices => "choices",
            Self::Pattern => "pattern",
            Self::Unique => "unique",
            Self::ForeignKey => "foreign_key",
            Self::ReadOnly => "read_only",
        }
    }

    /// Returns the default message template for this kind.
    ///
    /// Templates may reference field parameters in braces, e.g. `{min_length}`.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Invalid => "Value is invalid",
            Self::Required => "Value is required",
            Self::MinLength => "Length must be at least {min_length}",
            Self::MaxLength => "Length must be at most {max_length}",
            Self::MinValue => "Value must be greater than or equal to {min_value}",
            Self::MaxValue => "Value must be less than or equal to {max_value}",
            Self::Choices => "Value must be one of {choices}",
            Self::Pattern => "Value must match the pattern {pattern}",
            Self::Unique => "Value must be unique",
            Self::ForeignKey => "Related object does not exist",
            Self::ReadOnly => "Value is read only",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A structured validation failure.
///
/// A single field raises `Field`; a model (or a composite field such as an
/// embedded document or an array) aggregates failures into `Fields`, keyed by
/// field name or item index.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Failure of one value.
    Field {
        /// The failure kind.
        kind: ErrorKind,
        /// Rendered, human-readable message.
        message: String,
    },
    /// Failures keyed by field name, in schema order.
    Fields(IndexMap<String, ValidationError>),
}

impl ValidationError {
    /// Creates a single-value failure.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Field {
            kind,
            message: message.into(),
        }
    }

    /// Creates a single-value failure with the default message for `kind`.
    pub fn of(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// Creates an aggregate failure holding one entry.
    pub fn for_field(field: impl Into<String>, error: ValidationError) -> Self {
        let mut errors = IndexMap::new();
        errors.insert(field.into(), error);
        Self::Fields(errors)
    }

    /// Returns the kind of a single-value failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Field { kind, .. } => Some(*kind),
            Self::Fields(_) => None,
        }
    }

    /// Returns the message of a single-value failure.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Field { message, .. } => Some(message),
            Self::Fields(_) => None,
        }
    }

    /// Returns the nested failure for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&ValidationError> {
        match self {
            Self::Field { .. } => None,
            Self::Fields(errors) => errors.get(field),
        }
    }

    /// Returns the nested failure map, if this is an aggregate.
    pub fn fields(&self) -> Option<&IndexMap<String, ValidationError>> {
        match self {
            Self::Field { .. } => None,
            Self::Fields(errors) => Some(errors),
        }
    }

    /// Renders the failure as the `{field: message | {..}}` structure handed
    /// to form and API layers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Field { message, .. } => serde_json::Value::String(message.clone()),
            Self::Fields(errors) => serde_json::Value::Object(
                errors
                    .iter()
                    .map(|(name, error)| (name.clone(), error.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { message, .. } => f.write_str(message),
            Self::Fields(errors) => {
                let parts: Vec<String> = errors
                    .iter()
                    .map(|(name, error)| format!("{name}: {error}"))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Document mapper errors.
#[derive(Debug, Error)]
pub enum OdmError {
    /// One or more values failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A filter or sort references an unknown field or operator.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// No document matched a single-object lookup.
    #[error("{model} matching query does not exist")]
    DoesNotExist {
        /// Name of the model that was queried.
        model: String,
    },

    /// A field name is not part of the schema.
    #[error("{model} has no field named `{field}`")]
    UnknownField {
        /// Name of the model.
        model: String,
        /// The offending field name.
        field: String,
    },

    /// Storage driver failure.
    #[error("storage error: {0}")]
    Driver(#[from] DriverError),

    /// Invalid settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OdmError {
    /// Returns whether this is the not-found failure of the given model.
    pub fn is_does_not_exist(&self, schema: &Schema) -> bool {
        matches!(self, Self::DoesNotExist { model } if model == schema.name())
    }

    /// Returns the validation failure, if this is one.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(error) => Some(error),
            _ => None,
        }
    }
}

/// Result type alias for document mapper operations.
pub type Result<T> = std::result::Result<T, OdmError>;

/// Substitutes `{name}` placeholders in a message template.
pub(crate) fn render(template: &str, params: &[(&str, String)]) -> String {
    params
        .iter()
        .fold(template.to_string(), |message, (name, value)| {
            message.replace(&format!("{{{name}}}"), value)
        })
}
