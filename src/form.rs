//! Presentation hints stored next to a schema.
//!
//! Nothing here affects compilation or validation; the form renderer reads
//! these values verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WidgetType {
    Text,
    Textarea,
    Select,
    Checkbox,
    Radio,
    Date,
    Number,
    Email,
    Password,
    Tel,
    Url,
    File,
}

/// Choice offered by `select` and `radio` widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    /// String or number.
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Name of an asynchronous check run by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_validation: Option<String>,
}

/// Show a field only when another field satisfies `condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalDisplay {
    pub field: String,
    pub condition: String,
    #[serde(default)]
    pub value: Value,
}

/// Rendering hints for one form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormWidgetConfig {
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    /// Fields this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_display: Option<ConditionalDisplay>,
}

impl FormWidgetConfig {
    pub fn new(widget_type: WidgetType) -> Self {
        Self {
            widget_type,
            label: None,
            placeholder: None,
            helper_text: None,
            options: Vec::new(),
            validation: None,
            dependencies: Vec::new(),
            conditional_display: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Every field name this widget refers to: dependencies and the
    /// conditional-display source.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .map(String::as_str)
            .chain(self.conditional_display.iter().map(|c| c.field.as_str()))
    }
}
