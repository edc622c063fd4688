//! Field types for schema definitions.
//!
//! A field validates, coerces and (de)serializes one value. Every field kind
//! shares the [`FieldOptions`] block and the validation pipeline provided by
//! [`Field::validate_with`]; kinds only implement the coercion step and the
//! storage/wire conversions where they differ from the generic ones.

mod boolean;
mod char;
mod choice;
mod collection;
mod identity;
mod numeric;
mod relations;
mod temporal;
mod widget;

pub use boolean::BooleanField;
pub use char::{HostField, SlugField, StringField, UrlField};
pub use choice::{ChoiceField, MultipleChoiceField};
pub use collection::{ArrayField, EmbeddedField, JsonField, MapField};
pub use identity::IdField;
pub use numeric::{FloatField, IntegerField};
pub use relations::{ForeignKey, ManyToMany, Related};
pub use temporal::{DateField, DateTimeField, TimeField};
pub use widget::Widget;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bson::Bson;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::database::Database;
use crate::error::{render, ErrorKind, ValidationError};
use crate::schema::Schema;
use crate::value::Value;

type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;
type AsyncDefaultFn = Arc<dyn Fn() -> BoxFuture<'static, Value> + Send + Sync>;
type ValidatorFn = Arc<dyn Fn(&Value) -> Result<(), ValidationError> + Send + Sync>;
type AsyncValidatorFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), ValidationError>> + Send + Sync>;

/// Default value of a field.
#[derive(Clone, Default)]
pub enum FieldDefault {
    /// No default.
    #[default]
    None,
    /// A literal value.
    Value(Value),
    /// A zero-argument callable evaluated at validation time.
    Fn(DefaultFn),
    /// An asynchronous thunk awaited at validation time.
    Async(AsyncDefaultFn),
}

impl FieldDefault {
    /// Resolves the default, awaiting asynchronous thunks.
    pub async fn resolve(&self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Value(value) => value.clone(),
            Self::Fn(f) => f(),
            Self::Async(f) => f().await,
        }
    }

    /// Returns the literal default, if there is one.
    ///
    /// Callable defaults are not evaluated here; they only run when a value
    /// is validated.
    pub fn literal(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            _ => Value::Null,
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Fn(_) => f.write_str("Fn(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// A custom validator attached to a field.
#[derive(Clone)]
pub enum Validator {
    /// Runs synchronously against the coerced value.
    Sync(ValidatorFn),
    /// Awaited against the coerced value.
    Async(AsyncValidatorFn),
}

impl Validator {
    async fn run(&self, value: &Value) -> Result<(), ValidationError> {
        match self {
            Self::Sync(f) => f(value),
            Self::Async(f) => f(value.clone()).await,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Common field options.
#[derive(Debug, Clone)]
pub struct FieldOptions {
    name: OnceLock<String>,
    /// Default value.
    pub default: FieldDefault,
    /// Whether a value must be present after default substitution.
    pub required: bool,
    /// Whether callers may not supply a value that differs from the default.
    pub read_only: bool,
    /// Whether the value must be unique across the collection.
    pub unique: bool,
    /// Human-readable name.
    pub label: Option<String>,
    /// Help text for forms.
    pub help_text: Option<String>,
    /// Widget override.
    pub widget: Option<Widget>,
    /// Per-field message templates, by error kind.
    pub error_messages: HashMap<ErrorKind, String>,
    /// Custom validators, run after coercion.
    pub validators: Vec<Validator>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldOptions {
    /// Creates new field options with defaults.
    pub fn new() -> Self {
        Self {
            name: OnceLock::new(),
            default: FieldDefault::None,
            required: true,
            read_only: false,
            unique: false,
            label: None,
            help_text: None,
            widget: None,
            error_messages: HashMap::new(),
            validators: Vec::new(),
        }
    }

    /// Returns the bound field name.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Binds the field name. Only the first binding takes effect.
    pub(crate) fn bind(&self, name: &str) -> bool {
        self.name.set(name.to_string()).is_ok()
    }

    /// Sets a literal default.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }

    /// Sets a callable default.
    #[must_use]
    pub fn default_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = FieldDefault::Fn(Arc::new(f));
        self
    }

    /// Sets an asynchronous default.
    #[must_use]
    pub fn default_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.default = FieldDefault::Async(Arc::new(move || f().boxed()));
        self
    }

    /// Sets the required option.
    #[must_use]
    pub fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    /// Sets the read_only option.
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the unique option.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = Some(value.into());
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn help_text(mut self, value: impl Into<String>) -> Self {
        self.help_text = Some(value.into());
        self
    }

    /// Overrides the widget.
    #[must_use]
    pub fn widget(mut self, widget: Widget) -> Self {
        self.widget = Some(widget);
        self
    }

    /// Overrides the message template for `kind`.
    #[must_use]
    pub fn error(mut self, kind: ErrorKind, template: impl Into<String>) -> Self {
        self.error_messages.insert(kind, template.into());
        self
    }

    /// Adds a synchronous validator.
    #[must_use]
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validators.push(Validator::Sync(Arc::new(f)));
        self
    }

    /// Adds an asynchronous validator.
    #[must_use]
    pub fn async_validator<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ValidationError>> + Send + 'static,
    {
        self.validators
            .push(Validator::Async(Arc::new(move |value| f(value).boxed())));
        self
    }
}

/// What a field sees while validating: the database handle and the schema
/// that owns it.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    /// Database used to resolve related documents.
    pub db: &'a Database,
    /// Schema the field belongs to.
    pub schema: &'a Arc<Schema>,
}

impl<'a> FieldContext<'a> {
    /// Creates a context.
    pub fn new(db: &'a Database, schema: &'a Arc<Schema>) -> Self {
        Self { db, schema }
    }
}

/// A typed descriptor for a single schema attribute.
#[async_trait]
pub trait Field: Send + Sync + fmt::Debug {
    /// Returns the field options.
    fn options(&self) -> &FieldOptions;

    /// Returns a short name of the field kind, used in metadata.
    fn kind(&self) -> &'static str;

    /// Coerces a non-null value into the field's natural form.
    async fn coerce(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError>;

    /// Returns the bound field name, or an empty string before binding.
    fn name(&self) -> &str {
        self.options().name().unwrap_or_default()
    }

    /// Builds an error of `kind` from the field's message table.
    fn error(&self, kind: ErrorKind, params: &[(&str, String)]) -> ValidationError {
        let template = self
            .options()
            .error_messages
            .get(&kind)
            .map_or(kind.default_message(), String::as_str);
        ValidationError::new(kind, render(template, params))
    }

    /// Validates a value that was not explicitly supplied by the caller.
    async fn validate(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        self.validate_with(value, cx, false).await
    }

    /// Runs the validation pipeline.
    ///
    /// Defaults are substituted for `Null`, then the required and read-only
    /// checks run, then kind-specific coercion, then custom validators.
    /// `explicit` tells whether the caller supplied the value.
    async fn validate_with(
        &self,
        value: Value,
        cx: &FieldContext<'_>,
        explicit: bool,
    ) -> Result<Value, ValidationError> {
        let options = self.options();

        let value = if value.is_null() {
            options.default.resolve().await
        } else {
            value
        };

        if value.is_null() {
            if options.required {
                return Err(self.error(ErrorKind::Required, &[]));
            }
            return Ok(Value::Null);
        }

        if options.read_only && explicit && value != options.default.resolve().await {
            return Err(self.error(ErrorKind::ReadOnly, &[]));
        }

        let value = self.coerce(value, cx).await?;

        for validator in &options.validators {
            validator.run(&value).await?;
        }

        Ok(value)
    }

    /// Converts storage or wire form back into the in-memory form.
    ///
    /// Accepts already-typed input.
    async fn deserialize(&self, value: Value, cx: &FieldContext<'_>) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.coerce(value, cx).await
    }

    /// Converts an in-memory value to its wire form.
    fn serialize(&self, value: &Value) -> serde_json::Value {
        value.to_json()
    }

    /// Converts an in-memory value to its storage form.
    fn db_serialize(&self, value: &Value) -> Result<Bson, ValidationError> {
        Ok(value.to_bson())
    }

    /// Hook fired before the first persistence of an instance.
    fn on_create(&self, value: Value) -> Value {
        value
    }

    /// Hook fired before every persistence of an instance.
    fn on_save(&self, value: Value) -> Value {
        value
    }

    /// Returns the default widget for this kind.
    fn default_widget(&self) -> Widget {
        Widget::input("text")
    }

    /// Returns the widget, honoring the override in the options.
    fn widget(&self) -> Widget {
        self.options()
            .widget
            .clone()
            .unwrap_or_else(|| self.default_widget())
    }

    /// Returns presentation metadata for form layers.
    fn metadata(&self) -> serde_json::Value {
        let options = self.options();
        serde_json::json!({
            "name": self.name(),
            "kind": self.kind(),
            "label": options.label,
            "help_text": options.help_text,
            "required": options.required,
            "read_only": options.read_only,
            "default": self.serialize(&options.default.literal()),
            "widget": self.widget().to_json(),
        })
    }
}

/// Implements the `options` builder shared by every field kind.
macro_rules! impl_options {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Sets field options.
                #[must_use]
                pub fn options(mut self, options: $crate::fields::FieldOptions) -> Self {
                    self.options = options;
                    self
                }
            }
        )*
    };
}

pub(crate) use impl_options;
