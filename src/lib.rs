//! Gesture parsing, rolling screenshot capture and post-action verification
//! for UI test automation on touch devices.

pub mod buffer;
pub mod change;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod gesture;
pub mod logging;
pub mod types;
pub mod typing;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{CaptureService, CaptureSession, FrameRing, Retention, StopOutcome};
pub use change::{ChangeDetector, ImageHash};
pub use checkpoint::CheckpointScorer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use device::{
    AdbDevice, BoundedCapture, EventSource, FrameCapture, HostTimeline, StateMatcher,
};
pub use error::{Error, Result};
pub use gesture::{classify, AxisRange, Calibration, GestureStream, ScreenSize};
pub use logging::Logger;
pub use types::{
    Checkpoint, CheckpointReason, EventCode, Expectation, Frame, FrameImage, Gesture, GestureKind,
    RawEvent, SessionStatus, SwipeDirection, VerificationRequest,
};
pub use typing::{TypingDetector, TypingSequence};
pub use verify::{CandidateSource, VerificationResult, Verifier};
