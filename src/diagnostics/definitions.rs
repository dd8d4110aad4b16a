//! Error definition table

use crate::error::Result;
use serde::{Deserialize, Serialize};

const BUILTIN_DEFINITIONS: &str = include_str!("error_definitions.json");

/// One or more substrings that identify an error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single substring
    One(String),
    /// Any of several substrings
    Many(Vec<String>),
}

impl Trigger {
    /// The first trigger substring contained in `text`
    pub fn find_in<'a>(&'a self, text: &str) -> Option<&'a str> {
        match self {
            Trigger::One(t) => text.contains(t.as_str()).then_some(t.as_str()),
            Trigger::Many(ts) => ts
                .iter()
                .map(String::as_str)
                .find(|t| text.contains(t)),
        }
    }
}

/// Known error: trigger text, stable code and user-facing description
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDefinition {
    /// Stable error code
    pub code: String,
    /// Substring(s) identifying the error
    pub trigger: Trigger,
    /// User-facing description
    pub description: String,
}

/// Ordered table of known errors; the first match wins
#[derive(Clone, Debug, Default)]
pub struct ErrorDefinitions {
    definitions: Vec<ErrorDefinition>,
}

impl ErrorDefinitions {
    /// Parse a JSON array of definitions
    pub fn from_json(json: &str) -> Result<Self> {
        let definitions: Vec<ErrorDefinition> = serde_json::from_str(json)?;
        Ok(Self { definitions })
    }

    /// The table compiled into the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_DEFINITIONS)
    }

    /// First definition whose trigger occurs in `text`, with the matching trigger
    pub fn find(&self, text: &str) -> Option<(&ErrorDefinition, &str)> {
        self.definitions
            .iter()
            .find_map(|d| d.trigger.find_in(text).map(|t| (d, t)))
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
