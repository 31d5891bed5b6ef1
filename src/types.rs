use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCode {
    PositionX,
    PositionY,
    /// Contact key: value 1 begins a contact, 0 ends it.
    Touch,
    SyncReport,
    Other(String),
}

/// One hardware input sample as delivered by the device event source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: f64,
    pub code: EventCode,
    pub value: i64,
}

impl RawEvent {
    pub fn new(timestamp: f64, code: EventCode, value: i64) -> Self {
        Self {
            timestamp,
            code,
            value,
        }
    }

    pub fn position_x(timestamp: f64, value: i64) -> Self {
        Self::new(timestamp, EventCode::PositionX, value)
    }

    pub fn position_y(timestamp: f64, value: i64) -> Self {
        Self::new(timestamp, EventCode::PositionY, value)
    }

    pub fn touch_down(timestamp: f64) -> Self {
        Self::new(timestamp, EventCode::Touch, 1)
    }

    pub fn touch_up(timestamp: f64) -> Self {
        Self::new(timestamp, EventCode::Touch, 0)
    }

    pub fn sync(timestamp: f64) -> Self {
        Self::new(timestamp, EventCode::SyncReport, 0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn distance(self, other: ScreenPoint) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    Tap,
    LongPress,
    Swipe(SwipeDirection),
}

impl GestureKind {
    pub fn label(self) -> &'static str {
        match self {
            GestureKind::Tap => "tap",
            GestureKind::LongPress => "long_press",
            GestureKind::Swipe(SwipeDirection::Left) => "swipe_left",
            GestureKind::Swipe(SwipeDirection::Right) => "swipe_right",
            GestureKind::Swipe(SwipeDirection::Up) => "swipe_up",
            GestureKind::Swipe(SwipeDirection::Down) => "swipe_down",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "tap" => Some(GestureKind::Tap),
            "long_press" => Some(GestureKind::LongPress),
            "swipe_left" => Some(GestureKind::Swipe(SwipeDirection::Left)),
            "swipe_right" => Some(GestureKind::Swipe(SwipeDirection::Right)),
            "swipe_up" => Some(GestureKind::Swipe(SwipeDirection::Up)),
            "swipe_down" => Some(GestureKind::Swipe(SwipeDirection::Down)),
            _ => None,
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A completed contact. `x`/`y` is where the contact ended.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gesture {
    pub kind: GestureKind,
    pub x: f64,
    pub y: f64,
    pub start_x: f64,
    pub start_y: f64,
    pub duration_ms: u64,
    pub timestamp: f64,
}

impl Gesture {
    pub fn start(&self) -> ScreenPoint {
        ScreenPoint {
            x: self.start_x,
            y: self.start_y,
        }
    }

    pub fn end(&self) -> ScreenPoint {
        ScreenPoint {
            x: self.x,
            y: self.y,
        }
    }

    pub fn direction(&self) -> Option<SwipeDirection> {
        match self.kind {
            GestureKind::Swipe(direction) => Some(direction),
            _ => None,
        }
    }
}

/// Shared handle to encoded image bytes. Cloning never copies the pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameImage(Arc<[u8]>);

impl FrameImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for FrameImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameImage({} bytes)", self.0.len())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub timestamp: f64,
    pub image: FrameImage,
}

impl Frame {
    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            seq: self.seq,
            timestamp: self.timestamp,
            bytes: self.image.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub seq: u64,
    pub timestamp: f64,
    pub bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionStatus {
    Capturing,
    Degraded { consecutive_failures: u32 },
    Stopped,
}

impl SessionStatus {
    pub fn is_degraded(self) -> bool {
        matches!(self, SessionStatus::Degraded { .. })
    }
}

/// Point-in-time view of one capture session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferManifest {
    pub session_id: String,
    pub device_ref: String,
    pub started_at: f64,
    pub capture_interval_ms: u64,
    pub max_frames: usize,
    pub status: SessionStatus,
    /// Frames dropped by FIFO overflow.
    pub evicted: u64,
    /// Frames dropped when the session stopped with `Retention::Discard`.
    pub discarded: u64,
    pub failed_ticks: u64,
    pub frames: Vec<FrameMeta>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    ScreenChanged,
    LongWait,
    NavigationLike,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub gesture_index: usize,
    pub timestamp: f64,
    pub score: u32,
    pub reasons: std::collections::BTreeSet<CheckpointReason>,
}

/// What the application is expected to show; handed to the state matcher
/// verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Text(String),
    Structured(serde_json::Value),
}

impl Expectation {
    pub fn text(description: impl Into<String>) -> Self {
        Expectation::Text(description.into())
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Text(text) => write!(f, "\"{text}\""),
            Expectation::Structured(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub expectation: Expectation,
    pub action_timestamp: f64,
    pub recency_window_ms: u64,
}

impl VerificationRequest {
    pub fn new(expectation: Expectation, action_timestamp: f64, recency_window_ms: u64) -> Self {
        Self {
            expectation,
            action_timestamp,
            recency_window_ms,
        }
    }
}
