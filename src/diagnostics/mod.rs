//! Error classification for external tool output
//!
//! Tool output is matched against an ordered table of known errors compiled
//! into the crate ([`ErrorDefinitions::builtin`]). The [`Classifier`] turns a
//! chunk of output into a [`Classification`]:
//!
//! - `WARNING:` output becomes a non-terminal [`Diagnostic`](crate::types::Diagnostic)
//! - a table match becomes a known [`Fatal`](crate::types::Fatal), unless suppressed
//! - any other text with an error marker becomes an unexpected fatal with a
//!   report id for telemetry
//!
//! Applying a classification (state changes, telemetry, events) is the engine's job.

mod classifier;
mod definitions;

pub use classifier::{
    Classification, Classifier, ToolMessage, UNHANDLED_CODE, parse_tool_message,
};
pub use definitions::{ErrorDefinition, ErrorDefinitions, Trigger};

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated report ids
const REPORT_ID_LEN: usize = 8;

/// First sentence of `text`, used as the short message of a fatal
pub fn first_sentence(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                return text[..i + c.len_utf8()].trim().to_string();
            }
        }
    }
    text.to_string()
}

/// Random alphanumeric id echoed to the user when an error is reported
pub fn generate_report_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REPORT_ID_LEN)
        .map(char::from)
        .collect()
}
