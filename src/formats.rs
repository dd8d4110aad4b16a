//! Format ordering and quality approximation
//!
//! A requested quality rarely matches every item of a playlist exactly. These
//! helpers pick the closest available format per item, preferring the higher
//! option on ties, and merge format lists across playlist members.

use crate::types::{DownloadOptions, MediaFormat};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;

/// Sort formats best-first
///
/// Video formats come first, ordered by height then frame rate, followed by
/// audio formats by sample rate and anything else by id (descending).
pub fn sort_formats(formats: &mut [MediaFormat]) {
    formats.sort_by(compare_formats);
}

fn compare_formats(a: &MediaFormat, b: &MediaFormat) -> Ordering {
    let rank = |f: &MediaFormat| match (f.height, f.asr) {
        (Some(_), _) => 0,
        (None, Some(_)) => 1,
        (None, None) => 2,
    };
    rank(a).cmp(&rank(b)).then_with(|| match (a.height, b.height, a.asr, b.asr) {
        (Some(ah), Some(bh), _, _) => bh
            .cmp(&ah)
            .then_with(|| b.fps.unwrap_or(0).cmp(&a.fps.unwrap_or(0))),
        (_, _, Some(aa), Some(ba)) => ba.cmp(&aa),
        _ => b.id.cmp(&a.id),
    })
}

fn diff(a: u32, b: u32) -> u64 {
    u64::from(a.abs_diff(b))
}

/// Audio format closest to `target_asr`, or the highest sample rate without a target
pub fn approx_audio(formats: &[MediaFormat], target_asr: Option<u32>) -> Option<&MediaFormat> {
    let audio = formats.iter().filter(|f| f.asr.is_some());
    let asr = |f: &MediaFormat| f.asr.unwrap_or(0);
    match target_asr {
        None => audio.max_by_key(|f| asr(f)),
        Some(target) => audio.min_by_key(|f| (diff(asr(f), target), Reverse(asr(f)))),
    }
}

/// Video format closest to the requested height and frame rate
///
/// An exact height match is preferred; within it the closest frame rate wins.
/// Otherwise the height distance dominates the frame rate distance.
/// Without any target the best format is returned.
pub fn approx_video(
    formats: &[MediaFormat],
    target_height: Option<u32>,
    target_fps: Option<u32>,
) -> Option<&MediaFormat> {
    let video: Vec<&MediaFormat> = formats.iter().filter(|f| f.height.is_some()).collect();
    let height = |f: &MediaFormat| f.height.unwrap_or(0);
    let fps = |f: &MediaFormat| f.fps.unwrap_or(0);

    let (Some(target_h), target_fps) = (target_height, target_fps) else {
        return match target_fps {
            None => video.into_iter().max_by_key(|f| (height(f), fps(f))),
            Some(target_f) => video
                .into_iter()
                .min_by_key(|f| (diff(fps(f), target_f), Reverse((height(f), fps(f))))),
        };
    };

    let same_height: Vec<&MediaFormat> = video
        .iter()
        .copied()
        .filter(|f| f.height == Some(target_h))
        .collect();
    if !same_height.is_empty() {
        return match target_fps {
            None => same_height.into_iter().max_by_key(|f| fps(f)),
            Some(target_f) => same_height
                .into_iter()
                .min_by_key(|f| (diff(fps(f), target_f), Reverse(fps(f)))),
        };
    }

    video.into_iter().min_by_key(|f| {
        let dh = diff(height(f), target_h);
        let df = target_fps.map_or(0, |t| diff(fps(f), t));
        (dh * 1000 + df, Reverse((height(f), fps(f))))
    })
}

/// Resolve requested options against what an item actually offers
///
/// Height, frame rate and sample rate are snapped to the nearest available
/// format. Values stay unset when the item has no matching formats.
pub fn resolve_options(options: &DownloadOptions, formats: &[MediaFormat]) -> DownloadOptions {
    let mut resolved = options.clone();
    if options.track.wants_video()
        && (options.height.is_some() || options.fps.is_some())
        && let Some(f) = approx_video(formats, options.height, options.fps)
    {
        resolved.height = f.height;
        resolved.fps = f.fps.or(options.fps);
    }
    if options.track.wants_audio()
        && options.asr.is_some()
        && let Some(f) = approx_audio(formats, options.asr)
    {
        resolved.asr = f.asr;
    }
    resolved
}

/// Append formats not yet present by `(height, fps)`; the first seen wins
pub fn merge_formats(target: &mut Vec<MediaFormat>, more: &[MediaFormat]) {
    let mut seen: HashSet<_> = target.iter().map(MediaFormat::dedup_key).collect();
    for format in more {
        if seen.insert(format.dedup_key()) {
            target.push(format.clone());
        }
    }
}

/// Append codecs not yet present, keeping first-seen order
pub fn merge_codecs(target: &mut Vec<String>, more: &[String]) {
    for codec in more {
        if !target.contains(codec) {
            target.push(codec.clone());
        }
    }
}
