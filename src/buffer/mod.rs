//! Rolling screenshot buffer shared between one capture loop and any
//! number of verifiers.

pub mod persist;
pub mod service;


use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub use self::persist::{load_artifacts, write_artifacts, PersistedFrame, PersistedManifest};
pub use self::service::{CaptureService, CaptureSession, Retention, StopOutcome};

use crate::types::{BufferManifest, Frame, FrameImage, SessionStatus};

/// Bounded, FIFO-evicting frame store. Append and eviction happen under a
/// single write lock; readers only ever see a contiguous run of frames.
#[derive(Debug)]
pub struct FrameRing {
    state: RwLock<RingState>,
}

#[derive(Debug)]
struct RingState {
    session_id: String,
    device_ref: String,
    started_at: f64,
    interval_ms: u64,
    capacity: usize,
    frames: VecDeque<Frame>,
    next_seq: u64,
    evicted: u64,
    discarded: u64,
    failed_ticks: u64,
    consecutive_failures: u32,
    status: SessionStatus,
}

impl FrameRing {
    pub fn new(
        session_id: impl Into<String>,
        device_ref: impl Into<String>,
        started_at: f64,
        interval_ms: u64,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(RingState {
                session_id: session_id.into(),
                device_ref: device_ref.into(),
                started_at,
                interval_ms,
                capacity,
                frames: VecDeque::with_capacity(capacity),
                next_seq: 0,
                evicted: 0,
                discarded: 0,
                failed_ticks: 0,
                consecutive_failures: 0,
                status: SessionStatus::Capturing,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a frame, evicting the oldest when full. A timestamp lower
    /// than the newest buffered one is clamped up to it.
    pub fn push(&self, timestamp: f64, image: FrameImage) -> Frame {
        let mut state = self.write();
        let timestamp = match state.frames.back() {
            Some(last) if timestamp < last.timestamp => last.timestamp,
            _ => timestamp,
        };
        let frame = Frame {
            seq: state.next_seq,
            timestamp,
            image,
        };
        state.next_seq += 1;
        while state.frames.len() >= state.capacity {
            state.frames.pop_front();
            state.evicted += 1;
        }
        state.frames.push_back(frame.clone());
        state.consecutive_failures = 0;
        if state.status.is_degraded() {
            state.status = SessionStatus::Capturing;
        }
        frame
    }

    /// Counts a failed capture tick and returns the resulting status.
    pub fn record_failure(&self, degraded_after: u32) -> SessionStatus {
        let mut state = self.write();
        state.failed_ticks += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.status != SessionStatus::Stopped && state.consecutive_failures >= degraded_after {
            state.status = SessionStatus::Degraded {
                consecutive_failures: state.consecutive_failures,
            };
        }
        state.status
    }

    pub fn snapshot(&self) -> Vec<Frame> {
        self.read().frames.iter().cloned().collect()
    }

    /// Frames with `timestamp >= since`, oldest first.
    pub fn frames_since(&self, since: f64) -> Vec<Frame> {
        let state = self.read();
        let start = state.frames.partition_point(|frame| frame.timestamp < since);
        state.frames.range(start..).cloned().collect()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.read().frames.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    pub fn session_id(&self) -> String {
        self.read().session_id.clone()
    }

    pub fn manifest(&self) -> BufferManifest {
        let state = self.read();
        BufferManifest {
            session_id: state.session_id.clone(),
            device_ref: state.device_ref.clone(),
            started_at: state.started_at,
            capture_interval_ms: state.interval_ms,
            max_frames: state.capacity,
            status: state.status,
            evicted: state.evicted,
            discarded: state.discarded,
            failed_ticks: state.failed_ticks,
            frames: state.frames.iter().map(Frame::meta).collect(),
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.write().status = SessionStatus::Stopped;
    }

    /// Drops every buffered frame. Counted apart from overflow evictions.
    pub(crate) fn clear(&self) {
        let mut state = self.write();
        let dropped = state.frames.len() as u64;
        state.frames.clear();
        state.discarded += dropped;
    }
}
