//! Classification of raw tool output

use super::definitions::ErrorDefinitions;
use super::{first_sentence, generate_report_id};
use crate::types::{Diagnostic, DiagnosticLevel, Fatal};
use chrono::Utc;

/// Code of definitions that are never raised in development builds
const DEV_SUPPRESSED_CODE: &str = "ffmpeg not found";
/// Code of definitions that are never raised
const ALWAYS_SUPPRESSED_CODE: &str = "Thumbnail embedding not supported";
/// Code given to errors no definition matched
pub const UNHANDLED_CODE: &str = "Unhandled error";

/// Outcome of classifying a chunk of output
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Nothing error-like
    NoMatch,
    /// `WARNING:` output; surfaced as a non-terminal diagnostic only
    Informational(Diagnostic),
    /// Matched a definition that is deliberately not raised
    Suppressed {
        /// Code of the suppressed definition
        code: String,
    },
    /// Matched a known definition
    Known(Fatal),
    /// Contains an error marker but matched nothing
    Unhandled(Fatal),
}

impl Classification {
    /// Whether the output was classified as a raisable error
    pub fn is_error(&self) -> bool {
        matches!(self, Classification::Known(_) | Classification::Unhandled(_))
    }

    /// The fatal to raise, if any
    pub fn into_fatal(self) -> Option<Fatal> {
        match self {
            Classification::Known(f) | Classification::Unhandled(f) => Some(f),
            _ => None,
        }
    }
}

/// A structured `ERROR:` or `WARNING:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMessage {
    /// Severity
    pub level: DiagnosticLevel,
    /// Extractor or post-processor name from a `[name]` prefix
    pub component: Option<String>,
    /// Media id preceding the message, e.g. `dQw4w9WgXcQ:`
    pub media_id: Option<String>,
    /// Remaining message text
    pub message: String,
}

/// Parse an `ERROR:`/`WARNING:` line into its parts
pub fn parse_tool_message(line: &str) -> Option<ToolMessage> {
    let trimmed = line.trim();
    let (level, rest) = if let Some(rest) = trimmed.strip_prefix("ERROR:") {
        (DiagnosticLevel::Error, rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("WARNING:") {
        (DiagnosticLevel::Warning, rest.trim())
    } else {
        return None;
    };

    let (component, rest) = match rest.strip_prefix('[').and_then(|r| r.split_once(']')) {
        Some((component, rest)) => (Some(component.trim().to_string()), rest.trim()),
        None => (None, rest),
    };

    let (media_id, message) = match rest.split_once(": ") {
        Some((id, message))
            if !id.is_empty() && id.len() <= 64 && !id.contains(char::is_whitespace) =>
        {
            (Some(id.to_string()), message.trim())
        }
        _ => (None, rest),
    };

    Some(ToolMessage {
        level,
        component,
        media_id,
        message: message.to_string(),
    })
}

/// Turns raw tool output into typed diagnostics
#[derive(Debug, Clone)]
pub struct Classifier {
    definitions: ErrorDefinitions,
    dev_mode: bool,
}

impl Classifier {
    /// Create a classifier over `definitions`
    pub fn new(definitions: ErrorDefinitions, dev_mode: bool) -> Self {
        Self {
            definitions,
            dev_mode,
        }
    }

    /// Classify raw output of one invocation
    ///
    /// `exit_code` is recorded on the resulting fatal.
    pub fn classify(&self, raw: &str, exit_code: Option<i32>) -> Classification {
        let text = raw.trim();
        if text.is_empty() || text.contains("[debug]") {
            return Classification::NoMatch;
        }

        if text.starts_with("WARNING:") {
            let code = self
                .definitions
                .find(text)
                .map(|(def, _)| def.code.clone())
                .unwrap_or_else(|| "Warning".to_string());
            let (component, message) = match parse_tool_message(text) {
                Some(parsed) => (parsed.component, parsed.message),
                None => (None, text.to_string()),
            };
            tracing::warn!(code = %code, message = %message, "Tool warning");
            return Classification::Informational(Diagnostic {
                level: DiagnosticLevel::Warning,
                code,
                component,
                message,
                timestamp: Utc::now(),
            });
        }

        if let Some((def, trigger)) = self.definitions.find(text) {
            if (def.code == DEV_SUPPRESSED_CODE && self.dev_mode)
                || def.code == ALWAYS_SUPPRESSED_CODE
            {
                tracing::debug!(code = %def.code, "Suppressed tool error");
                return Classification::Suppressed {
                    code: def.code.clone(),
                };
            }
            tracing::debug!(code = %def.code, trigger, "Classified tool error");
            return Classification::Known(Fatal {
                code: def.code.clone(),
                short_message: first_sentence(&def.description),
                message: def.description.clone(),
                raw: raw.to_string(),
                exit_code,
                internal: false,
                unexpected: false,
                report_id: None,
                timestamp: Utc::now(),
            });
        }

        if text.contains("ERROR") {
            let message = text
                .lines()
                .find_map(parse_tool_message)
                .filter(|m| m.level == DiagnosticLevel::Error)
                .map(|m| m.message)
                .unwrap_or_else(|| text.to_string());
            tracing::error!(message = %message, "Unhandled tool error");
            return Classification::Unhandled(Fatal {
                code: UNHANDLED_CODE.to_string(),
                short_message: first_sentence(&message),
                message,
                raw: raw.to_string(),
                exit_code,
                internal: false,
                unexpected: true,
                report_id: Some(generate_report_id()),
                timestamp: Utc::now(),
            });
        }

        Classification::NoMatch
    }
}
