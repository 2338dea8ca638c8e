//! Tri-state evaluation result.

use std::fmt;

use serde_json::Value as Json;

/// Result of evaluating an expression.
///
/// Two `Error` values never compare equal, not even to themselves, so a
/// change detector downstream always lets a fresh error through.
#[derive(Debug, Clone)]
pub enum Value {
    /// A JSON value.
    Defined(Json),
    /// The expression produced no value (missing attribute, missing path).
    Undefined,
    /// Evaluation failed.
    Error(String),
}

impl Value {
    /// Shorthand for an error value.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn boolean(value: bool) -> Self {
        Self::Defined(Json::Bool(value))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The JSON payload, if defined.
    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Self::Defined(json) => Some(json),
            _ => None,
        }
    }

    /// Coerce to a boolean for use as a condition.
    ///
    /// Only a defined JSON boolean is a valid condition. Anything else
    /// yields the error message that callers turn into `Value::Error`.
    pub fn as_condition(&self) -> Result<bool, String> {
        match self {
            Self::Defined(Json::Bool(b)) => Ok(*b),
            Self::Defined(other) => Err(format!(
                "Type mismatch. Expected a boolean condition, but got {other}"
            )),
            Self::Undefined => Err("Condition evaluated to undefined".to_string()),
            Self::Error(message) => Err(message.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Defined(a), Self::Defined(b)) => a == b,
            (Self::Undefined, Self::Undefined) => true,
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Self::Defined(json)
    }
}

impl From<Option<Json>> for Value {
    fn from(json: Option<Json>) -> Self {
        json.map_or(Self::Undefined, Self::Defined)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(json) => write!(f, "{json}"),
            Self::Undefined => f.write_str("undefined"),
            Self::Error(message) => write!(f, "ERROR[{message}]"),
        }
    }
}
