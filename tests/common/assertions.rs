//! Waiting helpers built on the engine's event stream

use media_queue::{GroupId, LifecycleState, QueueEngine};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Result of waiting for a group to settle
#[derive(Debug)]
pub enum WaitResult {
    /// Group reached the requested state
    Reached,
    /// Group failed with the given short message
    Failed(String),
    /// Group was removed (e.g. split into single-item groups)
    Removed,
    /// Timeout waiting for the state
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a group to reach `target`, stopping early on failure
///
/// # Arguments
/// * `engine` - The engine instance
/// * `id` - Group to watch
/// * `target` - State to wait for
/// * `timeout` - Maximum time to wait
pub async fn wait_for_state(
    engine: &QueueEngine,
    id: GroupId,
    target: LifecycleState,
    timeout: Duration,
) -> WaitResult {
    let mut events = engine.subscribe();

    let result = tokio::time::timeout(timeout, async {
        loop {
            match engine.group_state(id) {
                Some(state) if state == target => return WaitResult::Reached,
                Some(LifecycleState::Error) => {
                    let message = engine
                        .group(id)
                        .and_then(|g| g.items.iter().find_map(|i| engine.fatal(i.id)))
                        .map(|f| f.short_message)
                        .unwrap_or_default();
                    return WaitResult::Failed(message);
                }
                Some(_) => {}
                None => return WaitResult::Removed,
            }

            // Any event may have moved the group; re-check after each
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    match result {
        Ok(wait_result) => wait_result,
        Err(_) => WaitResult::Timeout,
    }
}

/// Assert a group is in `expected`
pub fn assert_group_state(engine: &QueueEngine, id: GroupId, expected: LifecycleState) {
    let state = engine.group_state(id);
    assert_eq!(
        state,
        Some(expected),
        "Group {id} should be {expected:?}, got {state:?}"
    );
}
