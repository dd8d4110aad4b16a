//! Parser for the downloader's JSON metadata (`-J`)

use crate::error::Result;
use crate::types::{Item, MediaFormat};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    is_live: Option<bool>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    formats: Option<Vec<RawFormat>>,
    entries: Option<Vec<RawEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    url: Option<String>,
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    asr: Option<f64>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

/// Metadata of a single media resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingleInfo {
    /// Canonical page URL, if reported
    pub url: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Uploader
    pub uploader: Option<String>,
    /// Thumbnail URL
    pub thumbnail: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Distinct formats, best first as reported
    pub formats: Vec<MediaFormat>,
    /// Distinct audio codecs
    pub audio_codecs: Vec<String>,
    /// Size of the default format, exact or approximate
    pub size: Option<u64>,
    /// Live stream
    pub is_live: bool,
}

impl SingleInfo {
    /// Copy the metadata onto `item`
    pub fn apply_to(self, item: &mut Item) {
        item.title = self.title;
        item.uploader = self.uploader;
        item.thumbnail = self.thumbnail;
        item.duration = self.duration;
        item.formats = self.formats;
        item.audio_codecs = self.audio_codecs;
        item.size = self.size;
        item.is_live = self.is_live;
    }
}

/// Metadata of a playlist fetched flat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistInfo {
    /// Title
    pub title: Option<String>,
    /// Uploader
    pub uploader: Option<String>,
    /// Largest thumbnail URL
    pub thumbnail: Option<String>,
    /// Entry URLs in playlist order
    pub entries: Vec<String>,
}

/// Parsed metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MediaInfo {
    /// One resource (also used for live streams)
    Single(SingleInfo),
    /// A playlist of entry URLs
    Playlist(PlaylistInfo),
}

/// Parse `-J` output
///
/// A live stream is always treated as a single resource. Anything typed as a
/// playlist, or carrying entries, is a playlist.
pub fn parse_info(json: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json)?;
    let is_live = raw.is_live.unwrap_or(false);
    let is_playlist = raw.kind.as_deref() == Some("playlist") || raw.entries.is_some();

    if is_playlist && !is_live {
        return Ok(MediaInfo::Playlist(parse_playlist(raw)));
    }
    Ok(MediaInfo::Single(parse_single(raw, is_live)))
}

fn parse_playlist(raw: RawInfo) -> PlaylistInfo {
    let entries = raw
        .entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| e.url.or(e.webpage_url))
        .filter(|url| !url.is_empty())
        .collect();

    let thumbnail = raw
        .thumbnails
        .iter()
        .max_by_key(|t| u64::from(t.width.unwrap_or(0)) * u64::from(t.height.unwrap_or(0)))
        .and_then(|t| t.url.clone())
        .or(raw.thumbnail);

    PlaylistInfo {
        title: raw.title,
        uploader: raw.uploader,
        thumbnail,
        entries,
    }
}

fn parse_single(raw: RawInfo, is_live: bool) -> SingleInfo {
    let raw_formats = raw.formats.unwrap_or_default();
    let (formats, audio_codecs) = process_formats(&raw_formats);
    let total = raw_formats.len();
    tracing::debug!(
        detected = formats.len(),
        provided = total,
        "Detected unique formats"
    );

    SingleInfo {
        url: raw.webpage_url,
        title: raw.title,
        uploader: raw.uploader,
        thumbnail: raw.thumbnail,
        duration: raw.duration,
        formats,
        audio_codecs,
        size: raw.filesize.or(raw.filesize_approx).or_else(|| {
            raw_formats
                .last()
                .and_then(|f| f.filesize.or(f.filesize_approx))
        }),
        is_live,
    }
}

fn codec(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|c| *c != "none")
}

fn round(value: Option<f64>) -> Option<u32> {
    value.filter(|v| *v > 0.0).map(|v| v.round() as u32)
}

/// Distinct formats by `(height, fps)` for video and by sample rate for audio,
/// plus the audio codecs seen
fn process_formats(raw: &[RawFormat]) -> (Vec<MediaFormat>, Vec<String>) {
    let mut formats: Vec<MediaFormat> = Vec::new();
    let mut audio_codecs: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for fmt in raw {
        if fmt.height.is_none()
            && let Some(ac) = codec(fmt.acodec.as_ref())
            && !audio_codecs.iter().any(|c| c == ac)
        {
            audio_codecs.push(ac.to_string());
        }

        let Some(id) = fmt.format_id.clone() else {
            continue;
        };
        if fmt.ext.as_deref() == Some("mhtml") {
            continue;
        }

        let fps = round(fmt.fps);
        let asr = round(fmt.asr);
        let key = match (fmt.height, asr) {
            (Some(h), _) => (Some(h), fps, None),
            (None, Some(a)) => (None, None, Some(a)),
            (None, None) => continue,
        };
        if !seen.insert(key) {
            continue;
        }

        let video_codecs = raw
            .iter()
            .filter(|other| fmt.height.is_some() && other.height == fmt.height && round(other.fps) == fps)
            .filter_map(|other| codec(other.vcodec.as_ref()))
            .fold(Vec::<String>::new(), |mut acc, c| {
                if !acc.iter().any(|x| x == c) {
                    acc.push(c.to_string());
                }
                acc
            });

        formats.push(MediaFormat {
            id,
            height: fmt.height,
            fps: if fmt.height.is_some() { fps } else { None },
            asr: if fmt.height.is_none() { asr } else { None },
            ext: fmt.ext.clone(),
            video_codecs,
        });
    }

    (formats, audio_codecs)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_video() {
        let json = r#"{
            "title": "Clip",
            "uploader": "someone",
            "duration": 61.5,
            "webpage_url": "https://example.com/watch?v=1",
            "filesize_approx": 1000,
            "formats": [
                {"format_id": "sb0", "ext": "mhtml", "height": 90},
                {"format_id": "140", "ext": "m4a", "asr": 44100, "acodec": "mp4a.40.2", "vcodec": "none"},
                {"format_id": "251", "ext": "webm", "asr": 48000, "acodec": "opus", "vcodec": "none"},
                {"format_id": "136", "ext": "mp4", "height": 720, "fps": 30, "vcodec": "avc1", "acodec": "none"},
                {"format_id": "247", "ext": "webm", "height": 720, "fps": 30, "vcodec": "vp9", "acodec": "none"},
                {"format_id": "298", "ext": "mp4", "height": 720, "fps": 60, "vcodec": "avc1", "acodec": "none"}
            ]
        }"#;
        let MediaInfo::Single(info) = parse_info(json).unwrap() else {
            panic!("expected single");
        };
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.duration, Some(61.5));
        assert_eq!(info.size, Some(1000));
        assert!(!info.is_live);
        assert_eq!(info.audio_codecs, vec!["mp4a.40.2", "opus"]);

        let ids: Vec<_> = info.formats.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["140", "251", "136", "298"]);
        assert_eq!(info.formats[2].video_codecs, vec!["avc1", "vp9"]);
        assert_eq!(info.formats[0].asr, Some(44100));
    }

    #[test]
    fn parses_flat_playlist() {
        let json = r#"{
            "_type": "playlist",
            "title": "List",
            "thumbnails": [
                {"url": "small", "width": 10, "height": 10},
                {"url": "big", "width": 100, "height": 100}
            ],
            "entries": [
                {"url": "https://example.com/1"},
                {"webpage_url": "https://example.com/2"},
                {"url": ""}
            ]
        }"#;
        let MediaInfo::Playlist(info) = parse_info(json).unwrap() else {
            panic!("expected playlist");
        };
        assert_eq!(info.title.as_deref(), Some("List"));
        assert_eq!(info.thumbnail.as_deref(), Some("big"));
        assert_eq!(info.entries, vec!["https://example.com/1", "https://example.com/2"]);
    }

    #[test]
    fn empty_playlist_has_no_entries() {
        let MediaInfo::Playlist(info) = parse_info(r#"{"_type": "playlist", "entries": []}"#).unwrap()
        else {
            panic!("expected playlist");
        };
        assert!(info.entries.is_empty());
    }

    #[test]
    fn livestream_is_single() {
        let json = r#"{"title": "Live", "is_live": true, "entries": [{"url": "x"}]}"#;
        let MediaInfo::Single(info) = parse_info(json).unwrap() else {
            panic!("expected single");
        };
        assert!(info.is_live);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_info("{}").is_ok());
        assert!(parse_info("not json").is_err());
    }

    #[test]
    fn apply_copies_metadata() {
        let info = SingleInfo {
            title: Some("T".into()),
            size: Some(5),
            ..Default::default()
        };
        let mut item = Item::new(crate::types::GroupId::new(), "u");
        info.apply_to(&mut item);
        assert_eq!(item.title.as_deref(), Some("T"));
        assert_eq!(item.size, Some(5));
    }
}
