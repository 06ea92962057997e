//! Field descriptors and the type-tag dispatch built on them.
//!
//! Descriptors are produced server-side and fetched read-only. The `type` tag
//! is parsed into a closed [`FieldType`]; anything the client does not know is
//! kept verbatim in [`FieldType::Unsupported`] so that both the rule builder
//! and the widget selector handle it exhaustively.

use crate::wire::null_as_default;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Input type of a service field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Number,
    Textarea,
    Boolean,
    /// Type tag the client has no rule or widget for.
    Unsupported(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Textarea => "textarea",
            FieldType::Boolean => "boolean",
            FieldType::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, FieldType::Unsupported(_))
    }

    /// Widget used to render a field of this type.
    pub fn widget(&self) -> Widget {
        match self {
            FieldType::Text => Widget::TextInput,
            FieldType::Number => Widget::NumericInput,
            FieldType::Textarea => Widget::TextArea,
            FieldType::Boolean => Widget::Switch,
            FieldType::Unsupported(raw) => Widget::Unsupported {
                message: format!("unsupported field type: {}", raw),
            },
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "textarea" => FieldType::Textarea,
            "boolean" => FieldType::Boolean,
            other => FieldType::Unsupported(other.to_string()),
        })
    }
}

impl From<String> for FieldType {
    fn from(raw: String) -> Self {
        match raw.parse() {
            Ok(field_type) => field_type,
            Err(never) => match never {},
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Unsupported(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Rendering dispatch target for a field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widget {
    TextInput,
    /// Single-line input with a numeric input mode.
    NumericInput,
    TextArea,
    Switch,
    /// Placeholder shown instead of an input.
    Unsupported { message: String },
}

/// Metadata for one input of a service, keyed by `slug`.
///
/// Only `slug`, `type`, and `required` carry meaning for validation; the
/// backend may omit everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// `null` or missing on the wire means optional.
    #[serde(default, deserialize_with = "null_as_default")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete_fetcher: Option<String>,
}

impl FieldDescriptor {
    /// Create an optional field with no display metadata.
    pub fn new(slug: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            slug: slug.into(),
            title: None,
            description: None,
            field_type,
            default: None,
            required: false,
            placeholder: None,
            autocomplete_fetcher: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn widget(&self) -> Widget {
        self.field_type.widget()
    }

    /// Title to display, falling back to the slug.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.slug)
    }
}

/// Initial form values derived from field defaults.
///
/// Switches always start with a value (`false` unless the default reads
/// `"true"`); other fields only appear when they carry a default.
pub fn initial_values(fields: &[FieldDescriptor]) -> Map<String, Value> {
    let mut values = Map::new();
    for field in fields {
        match (&field.field_type, field.default.as_deref()) {
            (FieldType::Boolean, default) => {
                let on = default.is_some_and(|d| d.eq_ignore_ascii_case("true"));
                values.insert(field.slug.clone(), Value::Bool(on));
            }
            (_, Some(default)) => {
                values.insert(field.slug.clone(), Value::String(default.to_string()));
            }
            (_, None) => {}
        }
    }
    values
}
