//! Core configuration types for schema compilation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Same as [`json_type_name`], with absence reported as `undefined`.
pub fn received_type_name(value: Option<&Value>) -> &'static str {
    value.map_or("undefined", json_type_name)
}

/// Append one segment to a JSON Pointer, escaping `~` and `/` (RFC 6901).
pub fn join_pointer(path: &str, segment: &str) -> String {
    let escaped = segment.replace('~', "~0").replace('/', "~1");
    format!("{}/{}", path, escaped)
}

/// How object validators treat keys that are not declared in the shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeys {
    /// Drop undeclared keys from the output.
    #[default]
    Strip,
    /// Report undeclared keys as an issue.
    Strict,
    /// Copy undeclared keys to the output unchanged.
    Passthrough,
}

impl UnknownKeys {
    /// Parse a policy name.
    ///
    /// Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strip" => Some(UnknownKeys::Strip),
            "strict" => Some(UnknownKeys::Strict),
            "passthrough" => Some(UnknownKeys::Passthrough),
            _ => None,
        }
    }
}

/// Options for schema compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Policy for undeclared object keys, applied to every object node.
    pub unknown_keys: UnknownKeys,
}

impl CompileOptions {
    /// Create options with the default policy (strip unknown keys).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unknown-key policy.
    pub fn unknown_keys(mut self, unknown_keys: UnknownKeys) -> Self {
        self.unknown_keys = unknown_keys;
        self
    }

    /// Shorthand for `unknown_keys(UnknownKeys::Strict)` when `strict` is true.
    pub fn strict(self, strict: bool) -> Self {
        if strict {
            self.unknown_keys(UnknownKeys::Strict)
        } else {
            self
        }
    }
}
