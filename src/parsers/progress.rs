//! Parser for download progress output
//!
//! The downloader is invoked with a fixed progress template producing
//! `RAW|`-prefixed lines (see [`PROGRESS_TEMPLATE`]). Besides those, a few
//! other shapes are understood: a trailing JSON object, ffmpeg's live-stream
//! status line, and the bracketed stage lines the tool prints between files.
//! Anything that fails to parse is dropped.

use crate::types::{ProgressCategory, ProgressStage, ProgressUpdate};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Progress template passed to the downloader
pub const PROGRESS_TEMPLATE: &str = "RAW|%(progress.percent|)s|%(progress._percent_str|)s|%(progress.speed|)s|%(progress.eta|)s|%(progress.downloaded_bytes|)s|%(progress.total_bytes|)s|%(progress.total_bytes_estimate|)s|%(progress.fragment_index|)s|%(progress.fragment_count|)s";

const RAW_PREFIX: &str = "RAW|";
const RAW_FIELDS: usize = 9;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "flv", "mov", "avi", "m4v", "ts", "m2ts", "3gp",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "wav", "flac", "ogg", "opus", "mka", "aiff", "wma", "alac", "aac",
];
const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "srt", "ass", "lrc", "ttml", "srv1", "srv2", "srv3"];
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// One parsed fact from a line of output
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Numeric progress for the current file
    Progress(ProgressUpdate),
    /// The tool started writing a new file
    Destination {
        /// Output path as printed by the tool
        path: PathBuf,
        /// Category inferred from the extension
        category: ProgressCategory,
    },
    /// The download moved to another stage
    Stage {
        /// New stage
        stage: ProgressStage,
        /// Category of the file being processed
        category: ProgressCategory,
    },
}

/// Category of an output file by extension
pub fn category_for_path(path: &Path) -> ProgressCategory {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return ProgressCategory::Other;
    };
    let ext = ext.to_ascii_lowercase();
    let ext = ext.as_str();
    if VIDEO_EXTENSIONS.contains(&ext) {
        ProgressCategory::Video
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        ProgressCategory::Audio
    } else if SUBTITLE_EXTENSIONS.contains(&ext) {
        ProgressCategory::Subtitles
    } else if THUMBNAIL_EXTENSIONS.contains(&ext) {
        ProgressCategory::Thumbnail
    } else if ext == "json" {
        ProgressCategory::Metadata
    } else {
        ProgressCategory::Other
    }
}

/// Stateful line parser for one download
///
/// Tracks the category of the file currently written and the last stage, so a
/// stage is reported only when it changes.
#[derive(Debug, Default)]
pub struct ProgressParser {
    category: ProgressCategory,
    stage: Option<ProgressStage>,
}

impl ProgressParser {
    /// Create a parser for a fresh download
    pub fn new() -> Self {
        Self::default()
    }

    /// Category of the file currently being written
    pub fn category(&self) -> ProgressCategory {
        self.category
    }

    /// Parse one output line
    pub fn parse_line(&mut self, line: &str) -> Vec<ProgressLine> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        if let Some(rest) = line.strip_prefix(RAW_PREFIX) {
            return parse_raw(rest)
                .map(|update| vec![self.progress(update)])
                .unwrap_or_default();
        }

        if let Some(path) = line.strip_prefix("[download] Destination:") {
            return self.destination(path, ProgressStage::Downloading);
        }

        if let Some(rest) = line.strip_prefix("[Merger] Merging formats into") {
            return self.destination(rest, ProgressStage::Merging);
        }

        if line.starts_with("[Merger]") {
            return self.stage(ProgressStage::Merging).into_iter().collect();
        }

        if line.starts_with("[ffmpeg]")
            || line.starts_with("[Fixup")
            || line.starts_with("Deleting original file")
        {
            return self.stage(ProgressStage::Finalizing).into_iter().collect();
        }

        if let Some(update) = parse_live_status(line) {
            return vec![self.progress(update)];
        }

        if let Some(update) = parse_json_suffix(line) {
            return vec![self.progress(update)];
        }

        Vec::new()
    }

    fn progress(&mut self, mut update: ProgressUpdate) -> ProgressLine {
        update.category = Some(self.category);
        ProgressLine::Progress(update)
    }

    fn destination(&mut self, raw_path: &str, stage: ProgressStage) -> Vec<ProgressLine> {
        let path = PathBuf::from(raw_path.trim().trim_matches('"'));
        if path.as_os_str().is_empty() {
            return Vec::new();
        }
        let category = category_for_path(&path);
        self.category = category;

        let mut lines = vec![ProgressLine::Destination { path, category }];
        lines.extend(self.stage(stage));
        lines
    }

    fn stage(&mut self, stage: ProgressStage) -> Option<ProgressLine> {
        if self.stage == Some(stage) {
            return None;
        }
        self.stage = Some(stage);
        Some(ProgressLine::Stage {
            stage,
            category: self.category,
        })
    }
}

fn field(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && *v != "NA" && *v != "None")
}

fn float(raw: Option<&str>) -> Option<f64> {
    field(raw)
        .map(|v| v.trim_end_matches('%').trim())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn clamp_percentage(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn parse_raw(rest: &str) -> Option<ProgressUpdate> {
    let mut parts: Vec<&str> = rest.split('|').collect();
    parts.resize(RAW_FIELDS.max(parts.len()), "");

    let percent = float(Some(parts[0])).or_else(|| float(Some(parts[1])));
    let speed = float(Some(parts[2]));
    let eta = float(Some(parts[3]));
    let downloaded = float(Some(parts[4]));
    let total = float(Some(parts[5]));
    let estimate = float(Some(parts[6]));
    let frag_index = float(Some(parts[7]));
    let frag_count = float(Some(parts[8]));

    let total_bytes = total.or(estimate);
    let percentage = percent
        .or_else(|| match (downloaded, total_bytes) {
            (Some(d), Some(t)) if t > 0.0 => Some(d / t * 100.0),
            _ => None,
        })
        .or_else(|| match (frag_index, frag_count) {
            (Some(i), Some(n)) if n > 0.0 => Some(i / n * 100.0),
            _ => None,
        })
        .map(clamp_percentage);

    if percentage.is_none() && speed.is_none() && eta.is_none() {
        return None;
    }

    Some(ProgressUpdate {
        category: None,
        percentage,
        speed_bps: speed.filter(|s| *s >= 0.0),
        eta_secs: eta.filter(|e| *e >= 0.0).map(|e| e.round() as u64),
        downloaded_bytes: downloaded.filter(|d| *d >= 0.0).map(|d| d as u64),
        total_bytes: total_bytes.filter(|t| *t >= 0.0).map(|t| t as u64),
    })
}

fn parse_json_suffix(line: &str) -> Option<ProgressUpdate> {
    let start = line.find('{')?;
    let value: serde_json::Value = serde_json::from_str(&line[start..]).ok()?;
    let object = value.as_object()?;
    let number = |key: &str| object.get(key).and_then(serde_json::Value::as_f64);
    let string = |key: &str| object.get(key).and_then(serde_json::Value::as_str);

    let update = ProgressUpdate {
        category: None,
        percentage: number("percent")
            .or_else(|| float(string("percent")))
            .or_else(|| float(string("_percent_str")))
            .map(clamp_percentage),
        speed_bps: number("speed"),
        eta_secs: number("eta").filter(|e| *e >= 0.0).map(|e| e.round() as u64),
        downloaded_bytes: number("downloaded_bytes").map(|d| d as u64),
        total_bytes: number("total_bytes")
            .or_else(|| number("total_bytes_estimate"))
            .map(|t| t as u64),
    };
    (!update.is_empty()).then_some(update)
}

fn live_status_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"size=\s*(\d+)(kB|KiB|MB|MiB|B)\s+time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)\s+bitrate=\s*([\d.]+)kbits/s(?:.*?speed=\s*([\d.]+)x)?",
        )
        .ok()
    })
    .as_ref()
}

/// ffmpeg status line printed while recording a live stream
///
/// Yields the bytes written and a speed derived from the bitrate; a live
/// stream has no percentage.
fn parse_live_status(line: &str) -> Option<ProgressUpdate> {
    let caps = live_status_regex()?.captures(line)?;
    let size: u64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2)?.as_str() {
        "B" => 1,
        "MB" | "MiB" => 1024 * 1024,
        _ => 1024,
    };
    let bitrate_kbits: f64 = caps.get(6)?.as_str().parse().ok()?;
    let factor: f64 = caps
        .get(7)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1.0);

    Some(ProgressUpdate {
        category: None,
        percentage: None,
        speed_bps: Some(bitrate_kbits * 1000.0 / 8.0 * factor),
        eta_secs: None,
        downloaded_bytes: Some(size * multiplier),
        total_bytes: None,
    })
}

/// Elapsed media time of a live-stream status line, in seconds
pub fn live_elapsed_secs(line: &str) -> Option<f64> {
    let caps = live_status_regex()?.captures(line)?;
    let hours: f64 = caps.get(3)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(4)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(5)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn progress(lines: Vec<ProgressLine>) -> ProgressUpdate {
        match lines.as_slice() {
            [ProgressLine::Progress(update)] => update.clone(),
            other => panic!("expected one progress line, got {other:?}"),
        }
    }

    #[test]
    fn raw_line_with_all_fields() {
        let mut parser = ProgressParser::new();
        let update = progress(parser.parse_line(
            "RAW|42.5| 42.5%|1048576.0|12|4456448|10485760|NA|NA|NA",
        ));
        assert_eq!(update.percentage, Some(42.5));
        assert_eq!(update.speed_bps, Some(1_048_576.0));
        assert_eq!(update.eta_secs, Some(12));
        assert_eq!(update.downloaded_bytes, Some(4_456_448));
        assert_eq!(update.total_bytes, Some(10_485_760));
        assert_eq!(update.category, Some(ProgressCategory::Other));
    }

    #[test]
    fn raw_percentage_falls_back() {
        let mut parser = ProgressParser::new();
        let update = progress(parser.parse_line("RAW|NA| 12.0%|NA|NA|NA|NA|NA|NA|NA"));
        assert_eq!(update.percentage, Some(12.0));

        let update = progress(parser.parse_line("RAW|||||250|NA|1000||"));
        assert_eq!(update.percentage, Some(25.0));
        assert_eq!(update.total_bytes, Some(1000));

        let update = progress(parser.parse_line("RAW|NA|NA|NA|NA|NA|NA|NA|3|4"));
        assert_eq!(update.percentage, Some(75.0));
    }

    #[test]
    fn raw_percentage_is_clamped() {
        let mut parser = ProgressParser::new();
        let update = progress(parser.parse_line("RAW|140.0"));
        assert_eq!(update.percentage, Some(100.0));
        let update = progress(parser.parse_line("RAW|-3"));
        assert_eq!(update.percentage, Some(0.0));
    }

    #[test]
    fn empty_raw_line_is_dropped() {
        let mut parser = ProgressParser::new();
        assert!(parser.parse_line("RAW|NA|NA|NA|NA|NA|NA|NA|NA|NA").is_empty());
        assert!(parser.parse_line("RAW|garbage|x|y").is_empty());
    }

    #[test]
    fn destination_sets_category_and_stage_once() {
        let mut parser = ProgressParser::new();
        let lines = parser.parse_line("[download] Destination: /tmp/My Video.f137.mp4");
        assert_eq!(
            lines,
            vec![
                ProgressLine::Destination {
                    path: PathBuf::from("/tmp/My Video.f137.mp4"),
                    category: ProgressCategory::Video,
                },
                ProgressLine::Stage {
                    stage: ProgressStage::Downloading,
                    category: ProgressCategory::Video,
                },
            ]
        );

        let lines = parser.parse_line("[download] Destination: /tmp/My Video.f140.m4a");
        assert_eq!(lines.len(), 1);
        assert_eq!(parser.category(), ProgressCategory::Audio);

        let update = progress(parser.parse_line("RAW|5"));
        assert_eq!(update.category, Some(ProgressCategory::Audio));
    }

    #[test]
    fn merger_and_post_processing_stages() {
        let mut parser = ProgressParser::new();
        let lines = parser.parse_line("[Merger] Merging formats into \"/tmp/out.mkv\"");
        assert!(lines.contains(&ProgressLine::Destination {
            path: PathBuf::from("/tmp/out.mkv"),
            category: ProgressCategory::Video,
        }));
        assert!(lines.contains(&ProgressLine::Stage {
            stage: ProgressStage::Merging,
            category: ProgressCategory::Video,
        }));

        let lines = parser.parse_line("[FixupM3u8] Fixing MPEG-TS in MP4 container");
        assert!(matches!(
            lines.as_slice(),
            [ProgressLine::Stage {
                stage: ProgressStage::Finalizing,
                ..
            }]
        ));
        assert!(parser.parse_line("Deleting original file /tmp/a.f137.mp4").is_empty());
    }

    #[test]
    fn json_suffix() {
        let mut parser = ProgressParser::new();
        let update = progress(parser.parse_line(
            r#"download:{"percent": 50.0, "speed": 2048.0, "eta": 3, "downloaded_bytes": 100, "total_bytes": 200}"#,
        ));
        assert_eq!(update.percentage, Some(50.0));
        assert_eq!(update.speed_bps, Some(2048.0));
        assert_eq!(update.eta_secs, Some(3));
        assert!(parser.parse_line("note: {not json").is_empty());
        assert!(parser.parse_line(r#"{"unrelated": true}"#).is_empty());
    }

    #[test]
    fn live_stream_status() {
        let line = "frame=  250 fps= 25 q=-1.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.01x";
        let mut parser = ProgressParser::new();
        let update = progress(parser.parse_line(line));
        assert_eq!(update.percentage, None);
        assert_eq!(update.downloaded_bytes, Some(1024 * 1024));
        let speed = update.speed_bps.unwrap();
        assert!((speed - 838.9 * 1000.0 / 8.0 * 1.01).abs() < 1e-6);
        assert_eq!(live_elapsed_secs(line), Some(10.0));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let mut parser = ProgressParser::new();
        assert!(parser.parse_line("[youtube] abc: Downloading webpage").is_empty());
        assert!(parser.parse_line("").is_empty());
    }

    #[test]
    fn categories_by_extension() {
        assert_eq!(category_for_path(Path::new("a.OPUS")), ProgressCategory::Audio);
        assert_eq!(category_for_path(Path::new("a.en.vtt")), ProgressCategory::Subtitles);
        assert_eq!(category_for_path(Path::new("a.webp")), ProgressCategory::Thumbnail);
        assert_eq!(category_for_path(Path::new("a.info.json")), ProgressCategory::Metadata);
        assert_eq!(category_for_path(Path::new("a.part")), ProgressCategory::Other);
        assert_eq!(category_for_path(Path::new("noext")), ProgressCategory::Other);
    }
}
