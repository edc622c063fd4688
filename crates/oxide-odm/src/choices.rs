//! Named choice sets for choice fields.

use crate::value::Value;

/// One entry of a [`Choices`] set.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// Symbolic name used in code.
    pub name: String,
    /// Stored value.
    pub value: Value,
    /// Human-readable label.
    pub label: String,
}

/// An ordered set of `(name, value, label)` triples.
///
/// # Example
///
/// ```ignore
/// let status = Choices::new([
///     ("DRAFT", "d", "Draft"),
///     ("PUBLISHED", "p", "Published"),
/// ]);
/// assert_eq!(status.get("DRAFT"), Some(&Value::from("d")));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Choices {
    entries: Vec<Choice>,
}

impl Choices {
    /// Creates a choice set from `(name, value, label)` triples.
    pub fn new<I, N, V, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, V, L)>,
        N: Into<String>,
        V: Into<Value>,
        L: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, value, label)| Choice {
                    name: name.into(),
                    value: value.into(),
                    label: label.into(),
                })
                .collect(),
        }
    }

    /// Returns the value registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|choice| choice.name == name)
            .map(|choice| &choice.value)
    }

    /// Returns the label of `value`.
    pub fn label(&self, value: &Value) -> Option<&str> {
        self.entries
            .iter()
            .find(|choice| &choice.value == value)
            .map(|choice| choice.label.as_str())
    }

    /// Returns whether `value` is one of the choices.
    pub fn contains(&self, value: &Value) -> bool {
        self.entries.iter().any(|choice| &choice.value == value)
    }

    /// Finds the choice matching `value`, comparing textual forms so that
    /// form input such as `"1"` matches a stored `1`.
    pub fn resolve(&self, value: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|choice| {
                &choice.value == value
                    || matches!(value, Value::String(s) if *s == text(&choice.value))
            })
            .map(|choice| &choice.value)
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &Choice> {
        self.entries.iter()
    }

    /// Returns the values, rendered for messages.
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|choice| text(&choice.value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns `(value, label)` pairs for select widgets.
    pub fn options(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|choice| (text(&choice.value), choice.label.clone()))
            .collect()
    }
}

fn text(value: &Value) -> String {
    match value.to_json() {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
