//! Parsers for external tool output
//!
//! - [`progress`] - line-oriented progress and stage output of a running download
//! - [`info`] - JSON metadata of a URL (single resource or playlist)

pub mod info;
pub mod progress;

pub use info::{MediaInfo, PlaylistInfo, SingleInfo, parse_info};
pub use progress::{PROGRESS_TEMPLATE, ProgressLine, ProgressParser, category_for_path};
