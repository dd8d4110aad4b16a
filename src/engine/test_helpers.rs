//! Shared test helpers for creating QueueEngine instances backed by scripted tools.
//!
//! Every tool invocation is replaced by `sh -c <script>`, where the script is
//! chosen per [`ToolRequest`]. Scripts print canned metadata or progress lines
//! the same way the real tool would.

use crate::config::Config;
use crate::engine::QueueEngine;
use crate::error::{Error, Result};
use crate::notify::{NotificationDispatcher, NotificationParams, TelemetrySink};
use crate::runner::{Invocation, ProcessRunner, RunnerConfigProvider, ToolRequest};
use crate::types::{GroupId, ItemId, LifecycleState, NotificationKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = Box<dyn Fn(&ToolRequest) -> String + Send + Sync>;

/// Runner configuration answering every request with a shell script
pub(crate) struct ScriptedRunner {
    script: Script,
    requests: Mutex<Vec<ToolRequest>>,
}

impl ScriptedRunner {
    pub(crate) fn new(script: impl Fn(&ToolRequest) -> String + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in order
    pub(crate) fn requests(&self) -> Vec<ToolRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RunnerConfigProvider for ScriptedRunner {
    fn invocation(&self, request: &ToolRequest) -> Result<Invocation> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Invocation::new("sh").args(["-c".to_string(), (self.script)(request)]))
    }

    fn runner(&self, request: &ToolRequest) -> Result<ProcessRunner> {
        Ok(ProcessRunner::new(self.invocation(request)?).with_grace_period(Duration::from_secs(2)))
    }
}

/// Notifier remembering what it was asked to send
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, NotificationParams)>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<(NotificationKind, NotificationParams)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, params: NotificationParams, _force: bool) {
        self.sent.lock().unwrap().push((kind, params));
    }
}

/// Telemetry sink remembering reports
#[derive(Default)]
pub(crate) struct RecordingTelemetry {
    reports: Mutex<Vec<(String, String, Value)>>,
    submitted: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub(crate) fn reports(&self) -> Vec<(String, String, Value)> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    fn report(&self, code: &str, message: &str, context: Value) {
        self.reports
            .lock()
            .unwrap()
            .push((code.to_string(), message.to_string(), context));
    }

    async fn send_report(&self, report_id: &str) -> Result<()> {
        if report_id.is_empty() {
            return Err(Error::Other("empty report id".into()));
        }
        self.submitted.lock().unwrap().push(report_id.to_string());
        Ok(())
    }
}

/// An engine with its recording collaborators
pub(crate) struct TestEngine {
    pub(crate) engine: QueueEngine,
    pub(crate) runner: Arc<ScriptedRunner>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) telemetry: Arc<RecordingTelemetry>,
}

/// Helper to create a test engine whose tools run `script`
///
/// Concurrency is 4 and the split threshold 3.
pub(crate) fn create_test_engine(
    script: impl Fn(&ToolRequest) -> String + Send + Sync + 'static,
) -> TestEngine {
    let mut config = Config::default();
    config.limits.max_concurrency = 4;
    config.limits.split_threshold = 3;

    let runner = Arc::new(ScriptedRunner::new(script));
    let notifier = Arc::new(RecordingNotifier::default());
    let telemetry = Arc::new(RecordingTelemetry::default());
    let engine = QueueEngine::with_collaborators(
        config,
        runner.clone(),
        notifier.clone(),
        telemetry.clone(),
    )
    .unwrap();

    TestEngine {
        engine,
        runner,
        notifier,
        telemetry,
    }
}

/// Shell command printing `value` as one line of JSON
pub(crate) fn print_json(value: &Value) -> String {
    format!("printf '%s\\n' '{}'", value.to_string().replace('\'', "'\\''"))
}

/// Metadata of a single video offering `heights` at 30 fps plus one audio format
pub(crate) fn video_info(id: &str, title: &str, heights: &[u32]) -> Value {
    let mut formats: Vec<Value> = vec![json!({
        "format_id": format!("{id}-audio"),
        "ext": "m4a",
        "acodec": "mp4a.40.2",
        "vcodec": "none",
        "asr": 44100
    })];
    formats.extend(heights.iter().map(|h| {
        json!({
            "format_id": format!("{id}-{h}"),
            "ext": "mp4",
            "height": h,
            "fps": 30,
            "vcodec": "avc1",
            "acodec": "none",
            "filesize": 1000 * u64::from(*h)
        })
    }));
    json!({
        "id": id,
        "title": title,
        "uploader": "Uploader",
        "duration": 60.0,
        "webpage_url": format!("https://example.com/watch/{id}"),
        "formats": formats
    })
}

/// Flat playlist metadata listing `entries`
pub(crate) fn playlist_info(title: &str, entries: &[String]) -> Value {
    json!({
        "_type": "playlist",
        "title": title,
        "uploader": "Uploader",
        "entries": entries.iter().map(|url| json!({ "url": url })).collect::<Vec<_>>()
    })
}

/// Entry URLs `https://example.com/entry/0..n`
pub(crate) fn entry_urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://example.com/entry/{i}"))
        .collect()
}

/// Wait until `condition` holds, failing the test after 10 seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached within 10 seconds");
}

/// Wait until a group reaches `state`
pub(crate) async fn wait_for_group_state(engine: &QueueEngine, id: GroupId, state: LifecycleState) {
    wait_until(|| engine.group_state(id) == Some(state)).await;
}

/// Wait until an item reaches `state`
pub(crate) async fn wait_for_item_state(engine: &QueueEngine, id: ItemId, state: LifecycleState) {
    wait_until(|| engine.item_state(id) == Some(state)).await;
}
