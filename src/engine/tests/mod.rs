use super::test_helpers::*;
use super::*;
use crate::diagnostics::UNHANDLED_CODE;
use crate::error::{DownloadError, Error};
use crate::runner::ToolRequest;
use crate::types::TrackType;
use tokio::sync::broadcast::Receiver;

mod control;

/// Submitted URLs resolve to single videos titled after their last path segment
fn single_video(request: &ToolRequest) -> Option<String> {
    match request {
        ToolRequest::FetchInfo { url, .. } | ToolRequest::FetchEntry { url } => {
            let id = url.rsplit('/').next().unwrap_or("v");
            Some(print_json(&video_info(id, &format!("Video {id}"), &[720, 1080])))
        }
        _ => None,
    }
}

/// Download script printing a destination and finishing
fn quick_download() -> String {
    [
        "echo '[download] Destination: /tmp/media/out.mp4'",
        "echo 'RAW|25.0||1000.0|3|250|1000||||'",
        "echo 'RAW|100.0||1000.0|0|1000|1000||||'",
    ]
    .join("; ")
}

/// Events received so far
fn drain(rx: &mut Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Submit `url` and wait until it can be configured
async fn submit_ready(engine: &QueueEngine, url: &str) -> GroupId {
    let id = engine.submit_url(url, None).await.unwrap();
    wait_for_group_state(engine, id, LifecycleState::Configure).await;
    id
}

fn leader_id(engine: &QueueEngine, id: GroupId) -> ItemId {
    engine.group(id).unwrap().leader().unwrap().id
}

fn video_options(height: u32) -> DownloadOptions {
    DownloadOptions {
        track: TrackType::Both,
        height: Some(height),
        ..Default::default()
    }
}
