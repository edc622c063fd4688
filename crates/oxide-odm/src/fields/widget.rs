//! Presentation metadata for fields.

use indexmap::IndexMap;

/// Describes how a form layer should render a field.
///
/// The mapper never renders widgets; they only travel with
/// [`Field::metadata`](super::Field::metadata).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    /// Element tag, e.g. `input` or `select`.
    pub tag: String,
    /// Element attributes in insertion order.
    pub attrs: IndexMap<String, String>,
    /// `(value, label)` pairs for choice widgets.
    pub options: Vec<(String, String)>,
}

impl Widget {
    /// Creates a widget with the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: IndexMap::new(),
            options: Vec::new(),
        }
    }

    /// An `<input>` of the given type.
    pub fn input(input_type: &str) -> Self {
        Self::new("input").attr("type", input_type)
    }

    /// A `<textarea>`.
    pub fn textarea() -> Self {
        Self::new("textarea")
    }

    /// A checkbox input.
    pub fn checkbox() -> Self {
        Self::input("checkbox")
    }

    /// A `<select>` with the given options.
    pub fn select(options: Vec<(String, String)>) -> Self {
        Self {
            options,
            ..Self::new("select")
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Returns the widget as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tag": self.tag,
            "attrs": self
                .attrs
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
                .collect::<serde_json::Map<_, _>>(),
            "options": self
                .options
                .iter()
                .map(|(value, label)| serde_json::json!([value, label]))
                .collect::<Vec<_>>(),
        })
    }
}
