//! Core types for one recognition batch: modes, items, service results,
//! and the observation events consumed by a presentation layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::intake::{PreparedImage, PreviewHandle};

// ═══════════════════════════════════════════════════════════
// Recognition mode
// ═══════════════════════════════════════════════════════════

/// Service-side accuracy/latency trade-off selected per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    Fast,
    Quality,
}

impl RecognitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Quality => "quality",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(Self::Fast),
            "quality" => Some(Self::Quality),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Service result
// ═══════════════════════════════════════════════════════════

/// Which side of the chat a message bubble sat on. `Right` is the
/// device owner, `Left` the other party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerSide {
    Left,
    Right,
}

impl SpeakerSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// One pre-attributed message returned by the recognition service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_side: Option<SpeakerSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
}

impl StructuredMessage {
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            speaker_side: None,
            speaker_name: None,
        }
    }

    pub fn attributed(text: &str, side: SpeakerSide, name: &str) -> Self {
        Self {
            text: text.to_string(),
            speaker_side: Some(side),
            speaker_name: Some(name.to_string()),
        }
    }
}

/// Recognition service response for one image.
///
/// `structured_messages` non-empty signals that the service already
/// performed speaker attribution, bypassing heuristic segmentation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    #[serde(default)]
    pub structured_messages: Vec<StructuredMessage>,
}

impl OcrResult {
    /// Flat-text result with no speaker attribution.
    pub fn flat(text: &str) -> Self {
        Self {
            text: text.to_string(),
            confidence: 0.9,
            language: "中文".to_string(),
            structured_messages: Vec::new(),
        }
    }

    /// Structured result; `text` is the joined message texts.
    pub fn structured(messages: Vec<StructuredMessage>) -> Self {
        let text = messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            text,
            confidence: 0.9,
            language: "中文".to_string(),
            structured_messages: messages,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Image item
// ═══════════════════════════════════════════════════════════

/// Processing state of one image in the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Idle,
    Processing,
    Done,
    Error,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// One user-supplied photograph in the current batch.
///
/// Mutated in place by the extraction engine; buffers and the preview
/// handle are released when the item is dropped.
#[derive(Debug)]
pub struct ImageItem {
    pub id: Uuid,
    /// Provenance label shown on segments ("image 1", "image 2", ...).
    pub label: String,
    pub prepared: PreparedImage,
    pub preview: PreviewHandle,
    pub state: ItemState,
    pub result: Option<OcrResult>,
    pub error_info: Option<String>,
}

impl ImageItem {
    pub fn new(label: String, prepared: PreparedImage, preview: PreviewHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            prepared,
            preview,
            state: ItemState::Idle,
            result: None,
            error_info: None,
        }
    }

    pub(crate) fn settle_done(&mut self, result: OcrResult) {
        self.state = ItemState::Done;
        self.result = Some(result);
        self.error_info = None;
    }

    pub(crate) fn settle_error(&mut self, message: &str) {
        self.state = ItemState::Error;
        self.result = None;
        self.error_info = Some(message.to_string());
    }

    pub(crate) fn reset_idle(&mut self) {
        self.state = ItemState::Idle;
        self.result = None;
        self.error_info = None;
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, ItemState::Done | ItemState::Error)
    }
}

// ═══════════════════════════════════════════════════════════
// Observation events
// ═══════════════════════════════════════════════════════════

/// Event stream toward a presentation layer. The only boundary this
/// pipeline exposes to UI code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchEvent {
    Started {
        image_count: usize,
    },
    ItemState {
        item_id: Uuid,
        state: ItemState,
    },
    Progress {
        completed: usize,
        percent: f32,
    },
    Completed {
        done: usize,
        failed: usize,
    },
    Cancelled,
}

/// Incremental observation hook for batch activity.
pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &BatchEvent);
}

/// Observer that discards every event.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn on_event(&self, _event: &BatchEvent) {}
}

/// Observer that records every event, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<BatchEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Progress events only, as `(completed, percent)` pairs.
    pub fn progress_snapshots(&self) -> Vec<(usize, f32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { completed, percent } => Some((completed, percent)),
                _ => None,
            })
            .collect()
    }

    /// State transitions observed for one item, in order.
    pub fn states_for(&self, item_id: Uuid) -> Vec<ItemState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::ItemState { item_id: id, state } if id == item_id => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl BatchObserver for RecordingObserver {
    fn on_event(&self, event: &BatchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
