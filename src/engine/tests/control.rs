use super::*;
use std::path::Path;

/// Download that hangs at 10% until `marker` exists
fn blocking_download(marker: &Path) -> String {
    format!(
        "if [ -f '{}' ]; then {}; else echo 'RAW|10.0||||||||'; sleep 30; fi",
        marker.display(),
        quick_download()
    )
}

async fn wait_for_percentage(engine: &QueueEngine, item: ItemId, percentage: f64) {
    wait_until(|| engine.item_progress(item).and_then(|s| s.percentage) == Some(percentage)).await;
}

#[tokio::test]
async fn pause_and_resume_single_item() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("resume");
    let script_marker = marker.clone();
    let t = create_test_engine(move |r| match r {
        ToolRequest::Download { .. } => blocking_download(&script_marker),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let id = submit_ready(&t.engine, "https://example.com/watch/p").await;
    let item = leader_id(&t.engine, id);

    t.engine.download_group(id, video_options(1080)).await.unwrap();
    wait_for_percentage(&t.engine, item, 10.0).await;

    t.engine.cancel_group(id).await.unwrap();
    assert_eq!(t.engine.group_state(id), Some(LifecycleState::Paused));
    wait_until(|| t.engine.limiter.in_flight() == 0).await;

    // The interrupted tool reports nothing
    assert_eq!(t.engine.group_state(id), Some(LifecycleState::Paused));
    assert!(t.engine.fatal(item).is_none());
    assert!(t.telemetry.reports().is_empty());
    assert_eq!(t.notifier.count(NotificationKind::DownloadFailed), 0);

    std::fs::write(&marker, b"").unwrap();
    t.engine.resume_group(id).await.unwrap();
    wait_for_group_state(&t.engine, id, LifecycleState::Done).await;

    let heights: Vec<_> = t
        .runner
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            ToolRequest::Download { options, .. } => Some(options.height),
            _ => None,
        })
        .collect();
    assert_eq!(heights, vec![Some(1080), Some(1080)]);
    assert_eq!(t.notifier.count(NotificationKind::ItemFinished), 1);
}

#[tokio::test]
async fn pause_leaves_other_groups_running() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("never");
    let t = create_test_engine(move |r| match r {
        ToolRequest::Download { url, .. } if url.ends_with("/slow") => blocking_download(&marker),
        ToolRequest::Download { .. } => format!("sleep 1; {}", quick_download()),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let slow = submit_ready(&t.engine, "https://example.com/watch/slow").await;
    let fast = submit_ready(&t.engine, "https://example.com/watch/fast").await;

    t.engine
        .download_group(slow, DownloadOptions::default())
        .await
        .unwrap();
    t.engine
        .download_group(fast, DownloadOptions::default())
        .await
        .unwrap();
    wait_for_percentage(&t.engine, leader_id(&t.engine, slow), 10.0).await;

    t.engine.cancel_group(slow).await.unwrap();
    wait_for_group_state(&t.engine, fast, LifecycleState::Done).await;
    assert_eq!(t.engine.group_state(slow), Some(LifecycleState::Paused));
}

#[tokio::test]
async fn resume_skips_finished_members() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("resume");
    let script_marker = marker.clone();
    let entries = entry_urls(3);
    let list = entries.clone();
    let t = create_test_engine(move |r| match r {
        ToolRequest::FetchInfo { .. } => print_json(&playlist_info("Trio", &list)),
        ToolRequest::Download { url, .. } if url.ends_with("/2") => blocking_download(&script_marker),
        ToolRequest::Download { .. } => quick_download(),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let id = submit_ready(&t.engine, "https://example.com/list").await;
    let group = t.engine.group(id).unwrap();
    let leader = group.leader().unwrap().id;
    let member = |url: &str| group.items.iter().find(|i| i.url == url).unwrap().id;
    let (first, second, slow) = (member(&entries[0]), member(&entries[1]), member(&entries[2]));

    t.engine
        .download_group(id, DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(t.engine.item_state(leader), Some(LifecycleState::DownloadingList));
    wait_for_item_state(&t.engine, first, LifecycleState::Done).await;
    wait_for_item_state(&t.engine, second, LifecycleState::Done).await;
    wait_for_percentage(&t.engine, slow, 10.0).await;

    t.engine.cancel_group(id).await.unwrap();
    assert_eq!(t.engine.item_state(leader), Some(LifecycleState::PausedList));
    assert_eq!(t.engine.item_state(slow), Some(LifecycleState::Paused));
    assert_eq!(t.engine.item_state(first), Some(LifecycleState::Done));
    wait_until(|| t.engine.limiter.in_flight() == 0).await;

    std::fs::write(&marker, b"").unwrap();
    t.engine.resume_group(id).await.unwrap();
    wait_for_group_state(&t.engine, id, LifecycleState::Done).await;

    let downloads: Vec<String> = t
        .runner
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            ToolRequest::Download { url, .. } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(downloads.len(), 4);
    assert_eq!(downloads.iter().filter(|u| **u == entries[2]).count(), 2);
    assert_eq!(t.notifier.count(NotificationKind::PlaylistFinished), 1);
}

#[tokio::test]
async fn resume_leaves_failed_members_failed() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("resume");
    let script_marker = marker.clone();
    let entries = entry_urls(3);
    let list = entries.clone();
    let t = create_test_engine(move |r| match r {
        ToolRequest::FetchInfo { .. } => print_json(&playlist_info("Trio", &list)),
        ToolRequest::Download { url, .. } if url.ends_with("/1") => {
            "echo 'ERROR: [youtube] e1: Private video. Sign in if you have access' >&2; exit 1".into()
        }
        ToolRequest::Download { url, .. } if url.ends_with("/2") => blocking_download(&script_marker),
        ToolRequest::Download { .. } => quick_download(),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let id = submit_ready(&t.engine, "https://example.com/list").await;
    let group = t.engine.group(id).unwrap();
    let member = |url: &str| group.items.iter().find(|i| i.url == url).unwrap().id;
    let (first, failed, slow) = (member(&entries[0]), member(&entries[1]), member(&entries[2]));

    t.engine
        .download_group(id, DownloadOptions::default())
        .await
        .unwrap();
    wait_for_item_state(&t.engine, first, LifecycleState::Done).await;
    wait_for_item_state(&t.engine, failed, LifecycleState::Error).await;
    wait_for_percentage(&t.engine, slow, 10.0).await;

    t.engine.cancel_group(id).await.unwrap();
    wait_until(|| t.engine.limiter.in_flight() == 0).await;
    std::fs::write(&marker, b"").unwrap();
    t.engine.resume_group(id).await.unwrap();

    assert_eq!(t.engine.item_state(failed), Some(LifecycleState::Error));
    wait_for_group_state(&t.engine, id, LifecycleState::Done).await;
    assert_eq!(t.engine.item_state(failed), Some(LifecycleState::Error));

    let failed_downloads = t
        .runner
        .requests()
        .into_iter()
        .filter(|r| matches!(r, ToolRequest::Download { url, .. } if *url == entries[1]))
        .count();
    assert_eq!(failed_downloads, 1);
    assert_eq!(t.notifier.count(NotificationKind::PlaylistFinished), 1);
}

#[tokio::test]
async fn cancel_requires_downloading_group() {
    let t = create_test_engine(|r| single_video(r).unwrap_or_else(quick_download));
    let id = submit_ready(&t.engine, "https://example.com/watch/c").await;

    match t.engine.cancel_group(id).await.unwrap_err() {
        Error::Download(DownloadError::InvalidState {
            operation,
            current_state,
            ..
        }) => {
            assert_eq!(operation, "cancel");
            assert_eq!(current_state, "configure");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        t.engine.resume_group(id).await,
        Err(Error::Download(DownloadError::InvalidState { .. }))
    ));
}

#[tokio::test]
async fn delete_group_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("never");
    let t = create_test_engine(move |r| match r {
        ToolRequest::Download { .. } => blocking_download(&marker),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let id = submit_ready(&t.engine, "https://example.com/watch/d").await;
    let item = leader_id(&t.engine, id);
    t.engine
        .download_group(id, DownloadOptions::default())
        .await
        .unwrap();
    wait_for_percentage(&t.engine, item, 10.0).await;
    let mut rx = t.engine.subscribe();

    t.engine.delete_group(id).await.unwrap();

    assert!(t.engine.group(id).is_none());
    assert!(t.engine.item_state(item).is_none());
    assert!(t.engine.item_progress(item).is_none());
    assert!(t.engine.group_progress(id).is_none());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [Event::GroupDeleted { group_id }] if *group_id == id
    ));
    wait_until(|| t.engine.limiter.in_flight() == 0).await;
    assert!(t.engine.fatal(item).is_none());

    assert!(matches!(
        t.engine.delete_group(id).await,
        Err(Error::Download(DownloadError::GroupNotFound { .. }))
    ));
}

#[tokio::test]
async fn deleting_fetching_group_abandons_fetch() {
    let t = create_test_engine(|_| "sleep 30".into());
    let id = t
        .engine
        .submit_url("https://example.com/watch/slow", None)
        .await
        .unwrap();
    wait_until(|| t.runner.requests().len() == 1).await;

    t.engine.delete_group(id).await.unwrap();
    wait_until(|| t.engine.limiter.in_flight() == 0).await;
    assert!(t.engine.groups().is_empty());
    assert!(t.telemetry.reports().is_empty());
}

#[tokio::test]
async fn delete_all_counts_groups() {
    let t = create_test_engine(|r| single_video(r).unwrap_or_else(quick_download));
    submit_ready(&t.engine, "https://example.com/watch/1").await;
    submit_ready(&t.engine, "https://example.com/watch/2").await;

    assert_eq!(t.engine.delete_all().await.unwrap(), 2);
    assert!(t.engine.groups().is_empty());
    assert_eq!(t.engine.aggregate_progress().total, 0);
    assert_eq!(t.engine.delete_all().await.unwrap(), 0);
}

#[tokio::test]
async fn runtime_limits_reject_zero() {
    let t = create_test_engine(|_| "exit 1".into());

    assert!(matches!(
        t.engine.set_max_concurrency(0),
        Err(Error::Config { .. })
    ));
    t.engine.set_max_concurrency(2).unwrap();
    assert_eq!(t.engine.max_concurrency(), 2);

    match t.engine.set_split_threshold(0) {
        Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("split_threshold")),
        other => panic!("unexpected result: {other:?}"),
    }
    t.engine.set_split_threshold(10).unwrap();
    assert_eq!(t.engine.split_threshold(), 10);
}

#[tokio::test]
async fn shutdown_pauses_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("never");
    let t = create_test_engine(move |r| match r {
        ToolRequest::Download { .. } => blocking_download(&marker),
        other => single_video(other).unwrap_or_else(|| "exit 1".into()),
    });
    let id = submit_ready(&t.engine, "https://example.com/watch/s").await;
    t.engine
        .download_group(id, DownloadOptions::default())
        .await
        .unwrap();
    wait_for_percentage(&t.engine, leader_id(&t.engine, id), 10.0).await;
    let mut rx = t.engine.subscribe();

    t.engine.shutdown().await.unwrap();

    assert_eq!(t.engine.group_state(id), Some(LifecycleState::Paused));
    assert_eq!(t.engine.limiter.in_flight(), 0);
    assert!(drain(&mut rx).iter().any(|e| matches!(e, Event::Shutdown)));

    assert!(matches!(
        t.engine.submit_url("https://example.com/watch/late", None).await,
        Err(Error::ShuttingDown)
    ));
    assert!(matches!(
        t.engine.resume_group(id).await,
        Err(Error::ShuttingDown)
    ));
}
