//! The scalar value vocabulary attributes are validated against.
//!
//! Kept deliberately small: text, number, boolean, and an
//! opaque `filetree` bucket for structured JSON that the kernel does not
//! interpret itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The declared type of a genus attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Text,
    Number,
    Boolean,
    Filetree,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Text => "text",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
            AttributeType::Filetree => "filetree",
        }
    }

    /// Parses the stringly-typed form genus facts carry on the wire.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(AttributeType::Text),
            "number" => Some(AttributeType::Number),
            "boolean" => Some(AttributeType::Boolean),
            "filetree" => Some(AttributeType::Filetree),
            _ => None,
        }
    }

    /// Does `value`'s runtime shape satisfy this declared type?
    ///
    /// `filetree` requires a non-null JSON object; everything else requires
    /// an exact JSON scalar kind match.
    pub fn matches(&self, value: &Json) -> bool {
        match self {
            AttributeType::Text => value.is_string(),
            AttributeType::Number => value.is_number(),
            AttributeType::Boolean => value.is_boolean(),
            AttributeType::Filetree => value.is_object(),
        }
    }
}
