//! Core types and events for media-queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a group (a queue unit)
    GroupId
);

uuid_id!(
    /// Unique identifier for an item (one media resource)
    ItemId
);

/// Lifecycle state of an item
///
/// A group's state is derived from its leader item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// Metadata is being fetched
    Fetching,
    /// Playlist entries are being discovered
    FetchingList,
    /// Ready for the user to choose options and download
    Configure,
    /// A single item is downloading
    Downloading,
    /// A combined playlist is downloading
    DownloadingList,
    /// A single item was paused by the user
    Paused,
    /// A combined playlist was paused by the user
    PausedList,
    /// Terminal failure
    Error,
    /// Terminal success
    Done,
}

impl LifecycleState {
    /// Camel-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Fetching => "fetching",
            LifecycleState::FetchingList => "fetchingList",
            LifecycleState::Configure => "configure",
            LifecycleState::Downloading => "downloading",
            LifecycleState::DownloadingList => "downloadingList",
            LifecycleState::Paused => "paused",
            LifecycleState::PausedList => "pausedList",
            LifecycleState::Error => "error",
            LifecycleState::Done => "done",
        }
    }

    /// Downloading state for a single item or a combined list
    pub fn downloading(list: bool) -> Self {
        if list {
            LifecycleState::DownloadingList
        } else {
            LifecycleState::Downloading
        }
    }

    /// Paused state for a single item or a combined list
    pub fn paused(list: bool) -> Self {
        if list {
            LifecycleState::PausedList
        } else {
            LifecycleState::Paused
        }
    }

    /// `error` and `done` end an item's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Error | LifecycleState::Done)
    }

    /// Whether a download is running in this state
    pub fn is_downloading(&self) -> bool {
        matches!(
            self,
            LifecycleState::Downloading | LifecycleState::DownloadingList
        )
    }

    /// Whether a download was paused in this state
    pub fn is_paused(&self) -> bool {
        matches!(self, LifecycleState::Paused | LifecycleState::PausedList)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tracks a download should contain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    /// Video with audio
    #[default]
    Both,
    /// Audio only
    AudioOnly,
    /// Video only
    VideoOnly,
}

impl TrackType {
    /// Whether a video stream is requested
    pub fn wants_video(&self) -> bool {
        !matches!(self, TrackType::AudioOnly)
    }

    /// Whether an audio stream is requested
    pub fn wants_audio(&self) -> bool {
        !matches!(self, TrackType::VideoOnly)
    }
}

/// Track and quality selection for a download
///
/// Also the cache key for size lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Track selection
    #[serde(default)]
    pub track: TrackType,
    /// Target video height in pixels
    #[serde(default)]
    pub height: Option<u32>,
    /// Target frame rate
    #[serde(default)]
    pub fps: Option<u32>,
    /// Target audio sample rate in Hz
    #[serde(default)]
    pub asr: Option<u32>,
}

/// One format offered by the extraction tool for an item
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Tool-specific format identifier
    pub id: String,
    /// Video height in pixels
    pub height: Option<u32>,
    /// Frame rate
    pub fps: Option<u32>,
    /// Audio sample rate in Hz
    pub asr: Option<u32>,
    /// Container extension
    pub ext: Option<String>,
    /// Video codecs available at this format
    #[serde(default)]
    pub video_codecs: Vec<String>,
}

impl MediaFormat {
    /// Key used to de-duplicate formats across playlist members
    pub fn dedup_key(&self) -> (Option<u32>, Option<u32>) {
        (self.height, self.fps)
    }
}

/// One media resource
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier
    pub id: ItemId,
    /// Owning group
    pub group_id: GroupId,
    /// Source URL
    pub url: String,
    /// Title
    pub title: Option<String>,
    /// Uploader name
    pub uploader: Option<String>,
    /// Thumbnail URL
    pub thumbnail: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Available audio codecs
    #[serde(default)]
    pub audio_codecs: Vec<String>,
    /// Available formats
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
    /// Cumulative size estimate in bytes
    pub size: Option<u64>,
    /// Whether this item represents its group
    pub is_leader: bool,
    /// Ordered child URLs; present only on a playlist descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    /// Live stream
    #[serde(default)]
    pub is_live: bool,
    /// Stand-in for a playlist member whose metadata could not be fetched
    #[serde(default)]
    pub unavailable: bool,
    /// Stand-in created on submission, replaced by the first real item
    #[serde(default)]
    pub placeholder: bool,
}

impl Item {
    /// Create an empty item for `url` in `group_id`
    pub fn new(group_id: GroupId, url: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            group_id,
            url: url.into(),
            title: None,
            uploader: None,
            thumbnail: None,
            duration: None,
            audio_codecs: Vec::new(),
            formats: Vec::new(),
            size: None,
            is_leader: false,
            entries: None,
            is_live: false,
            unavailable: false,
            placeholder: false,
        }
    }

    /// Leader placeholder for a freshly submitted URL
    pub fn placeholder(group_id: GroupId, url: impl Into<String>) -> Self {
        Self {
            is_leader: true,
            placeholder: true,
            ..Self::new(group_id, url)
        }
    }

    /// Marker for a playlist entry that failed to resolve
    pub fn unavailable(group_id: GroupId, url: impl Into<String>) -> Self {
        Self {
            unavailable: true,
            ..Self::new(group_id, url)
        }
    }

    /// Whether this is a playlist descriptor
    pub fn is_descriptor(&self) -> bool {
        self.entries.is_some()
    }

    /// Whether a download job can be dispatched for this item
    pub fn is_downloadable(&self) -> bool {
        !self.placeholder && !self.unavailable && !self.is_descriptor()
    }
}

/// A queue unit: one item, or a playlist of many
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    /// Identifier
    pub id: GroupId,
    /// URL the group was submitted with
    pub url: String,
    /// Number of items expected
    pub total: usize,
    /// Number of non-leader items received
    pub processed: usize,
    /// Number of fatals recorded against members
    pub errored: usize,
    /// Consolidated playlist
    pub is_combined: bool,
    /// Title (from the leader)
    pub title: Option<String>,
    /// Uploader (from the leader)
    pub uploader: Option<String>,
    /// Thumbnail (from the leader)
    pub thumbnail: Option<String>,
    /// Aggregate duration in seconds
    pub duration: Option<f64>,
    /// Aggregate formats
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
    /// Aggregate audio codecs
    #[serde(default)]
    pub audio_codecs: Vec<String>,
    /// Aggregate size in bytes
    pub size: Option<u64>,
    /// Members in insertion order
    pub items: Vec<Item>,
    /// Extra HTTP headers forwarded to the tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// When the group was created
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Create a group for `url` holding a leader placeholder
    pub fn with_placeholder(url: impl Into<String>) -> Self {
        let url = url.into();
        let id = GroupId::new();
        Self {
            id,
            url: url.clone(),
            total: 1,
            processed: 0,
            errored: 0,
            is_combined: false,
            title: None,
            uploader: None,
            thumbnail: None,
            duration: None,
            formats: Vec::new(),
            audio_codecs: Vec::new(),
            size: None,
            items: vec![Item::placeholder(id, url)],
            headers: None,
            created_at: Utc::now(),
        }
    }

    /// Single-item group led by `item`, used when a playlist is split
    pub fn from_single(mut item: Item, headers: Option<HashMap<String, String>>) -> Self {
        let id = GroupId::new();
        item.group_id = id;
        item.is_leader = true;
        let mut group = Self {
            id,
            url: item.url.clone(),
            total: 1,
            processed: 1,
            errored: 0,
            is_combined: false,
            title: None,
            uploader: None,
            thumbnail: None,
            duration: None,
            formats: Vec::new(),
            audio_codecs: Vec::new(),
            size: None,
            items: Vec::new(),
            headers,
            created_at: Utc::now(),
        };
        group.copy_leader_metadata(&item);
        group.items.push(item);
        group
    }

    /// Find a member by id
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Find a member by id, mutably
    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// The member flagged as leader
    pub fn leader(&self) -> Option<&Item> {
        self.items.iter().find(|i| i.is_leader)
    }

    /// Ids of all members
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id).collect()
    }

    /// Whether the group still holds only its submission placeholder
    pub fn holds_placeholder(&self) -> bool {
        self.items.len() == 1 && self.items[0].placeholder
    }

    /// Whether the group's leader is a playlist descriptor
    pub fn is_playlist(&self) -> bool {
        self.leader().is_some_and(Item::is_descriptor)
    }

    /// Overwrite the group's top-level metadata from `leader`
    pub fn copy_leader_metadata(&mut self, leader: &Item) {
        self.title = leader.title.clone();
        self.uploader = leader.uploader.clone();
        self.thumbnail = leader.thumbnail.clone();
        self.duration = leader.duration;
        self.formats = leader.formats.clone();
        self.audio_codecs = leader.audio_codecs.clone();
        self.size = leader.size;
    }
}

/// Kind of content a progress sample refers to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressCategory {
    /// Video stream
    Video,
    /// Audio stream
    Audio,
    /// Subtitle files
    Subtitles,
    /// Thumbnail image
    Thumbnail,
    /// Info/description files
    Metadata,
    /// Anything else
    #[default]
    Other,
}

/// Stage of a running download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Started, nothing transferred yet
    #[default]
    Initializing,
    /// Transferring data
    Downloading,
    /// Merging streams
    Merging,
    /// Post-processing (fixups, embedding, cleanup)
    Finalizing,
}

/// Merged progress of one item
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// What is being transferred
    pub category: ProgressCategory,
    /// Current stage
    pub stage: ProgressStage,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: Option<f64>,
    /// Speed in bytes per second
    pub speed_bps: Option<f64>,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
    /// Bytes transferred so far
    pub downloaded_bytes: Option<u64>,
    /// Total bytes, exact or estimated
    pub total_bytes: Option<u64>,
}

/// A partial progress report parsed from one output line
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Category, if the line carries one
    pub category: Option<ProgressCategory>,
    /// Percentage complete
    pub percentage: Option<f64>,
    /// Speed in bytes per second
    pub speed_bps: Option<f64>,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
    /// Bytes transferred so far
    pub downloaded_bytes: Option<u64>,
    /// Total bytes
    pub total_bytes: Option<u64>,
}

impl ProgressUpdate {
    /// Whether no field was parsed
    pub fn is_empty(&self) -> bool {
        self.percentage.is_none()
            && self.speed_bps.is_none()
            && self.eta_secs.is_none()
            && self.downloaded_bytes.is_none()
            && self.total_bytes.is_none()
    }
}

/// Severity of a diagnostic line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// `WARNING:` line
    Warning,
    /// `ERROR:` line
    Error,
}

/// Non-terminal notable event tied to an item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub level: DiagnosticLevel,
    /// Classified code, or "Warning" when nothing matched
    pub code: String,
    /// Tool component (e.g. "youtube"), if the line named one
    pub component: Option<String>,
    /// Message without prefix and component
    pub message: String,
    /// When the line was seen
    pub timestamp: DateTime<Utc>,
}

/// Terminal failure of one item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fatal {
    /// Classified error code
    pub code: String,
    /// First sentence of the description, shown inline
    pub short_message: String,
    /// Full description
    pub message: String,
    /// Raw tool output
    pub raw: String,
    /// Exit code of the tool, absent for orchestration failures
    pub exit_code: Option<i32>,
    /// Raised by the orchestration layer rather than the tool
    pub internal: bool,
    /// Not matched by any definition
    pub unexpected: bool,
    /// Report id for telemetry, set for unexpected fatals
    pub report_id: Option<String>,
    /// When the fatal was raised
    pub timestamp: DateTime<Utc>,
}

/// Progress summary for one group
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupProgress {
    /// Group ID
    pub group_id: GroupId,
    /// Sum of member speeds in bytes per second
    pub speed_bps: f64,
    /// Members configured but not downloading
    pub ready: usize,
    /// Members downloading
    pub downloading: usize,
    /// Members done
    pub done: usize,
    /// Denominator for an overall percentage
    pub total: usize,
    /// Mean member percentage, done members counting as 100
    pub percentage: f64,
}

/// Progress summary across the whole queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    /// Items configured but not downloading
    pub ready: usize,
    /// Items downloading
    pub downloading: usize,
    /// Items done
    pub done: usize,
    /// `downloading + done` while anything downloads, else `ready + done`
    pub total: usize,
}

/// Milestones forwarded to the notification dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Item(s) ready to configure
    ItemReady,
    /// Combined playlist ready to configure
    PlaylistReady,
    /// Single item finished downloading
    ItemFinished,
    /// Every member of a combined playlist finished
    PlaylistFinished,
    /// A group failed
    DownloadFailed,
}

/// Event emitted by the queue engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// URL submitted, group created in `fetching`
    GroupCreated {
        /// Group ID
        group_id: GroupId,
        /// Submitted URL
        url: String,
    },

    /// Item added to a group
    ItemAdded {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// Item title, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    /// Lifecycle state of an item changed
    StateChanged {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// New state
        state: LifecycleState,
    },

    /// Progress sample merged for an item
    Progress {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// Merged sample
        sample: ProgressSample,
    },

    /// Stage of an item changed
    ProgressStage {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// New stage
        stage: ProgressStage,
        /// Category the stage applies to
        category: ProgressCategory,
    },

    /// Item finished downloading
    Complete {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
    },

    /// Non-terminal diagnostic for an item
    Diagnostic {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// Diagnostic details
        diagnostic: Diagnostic,
    },

    /// Terminal failure of an item
    Fatal {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// Failure details
        fatal: Fatal,
    },

    /// Tool started writing an output file
    Destination {
        /// Group ID
        group_id: GroupId,
        /// Item ID
        item_id: ItemId,
        /// Output path
        path: PathBuf,
    },

    /// Playlist group split into single-item groups
    GroupSplit {
        /// Removed group
        group_id: GroupId,
        /// Groups created in its place
        into: Vec<GroupId>,
    },

    /// Playlist group consolidated into one combined group
    GroupConsolidated {
        /// Group ID
        group_id: GroupId,
        /// Number of downloadable members
        items: usize,
    },

    /// Group deleted by the user
    GroupDeleted {
        /// Group ID
        group_id: GroupId,
    },

    /// Engine shutting down
    Shutdown,
}
