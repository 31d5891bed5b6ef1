//! Post-action verification against buffered frames.


use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    buffer::{persist, FrameRing},
    clock::Clock,
    config::VerifyConfig,
    device::{BoundedCapture, FrameCapture, StateMatcher},
    error::{Error, Result},
    logging::Logger,
    types::{Expectation, Frame, FrameImage, VerificationRequest},
};

pub const REPORT_FILE: &str = "verification.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Buffer,
    FreshCapture,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatcherError {
    pub seq: u64,
    pub timestamp: f64,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub passed: bool,
    pub expectation: Expectation,
    pub action_timestamp: f64,
    pub evaluated_at: f64,
    pub recency_window_ms: u64,
    pub source: CandidateSource,
    /// Buffered frames at or after the action, before the recency filter.
    pub frames_since_action: usize,
    /// Newest first, in the order the matcher saw them.
    pub checked_frames: Vec<Frame>,
    pub matched_frame: Option<Frame>,
    pub matcher_errors: Vec<MatcherError>,
}

impl VerificationResult {
    fn age_ms(&self, frame: &Frame) -> f64 {
        (self.evaluated_at - frame.timestamp) * 1000.0
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} {} after t={:.3} ({} ms window, {}): ",
            if self.passed { "PASS" } else { "FAIL" },
            self.expectation,
            self.action_timestamp,
            self.recency_window_ms,
            match self.source {
                CandidateSource::Buffer => "buffer",
                CandidateSource::FreshCapture => "fresh capture",
            }
        );
        let _ = write!(
            out,
            "checked {} of {} frames [",
            self.checked_frames.len(),
            self.frames_since_action
        );
        for (i, frame) in self.checked_frames.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "#{} age {:.0} ms", frame.seq, self.age_ms(frame));
        }
        out.push(']');
        match &self.matched_frame {
            Some(frame) => {
                let _ = write!(out, "; matched #{} at t={:.3}", frame.seq, frame.timestamp);
            }
            None => out.push_str("; no frame matched"),
        }
        if !self.matcher_errors.is_empty() {
            let _ = write!(out, "; {} matcher errors", self.matcher_errors.len());
        }
        out
    }

    /// Writes the checked frames and a JSON report into `dir`; returns the
    /// report path.
    pub fn write_diagnostics(&self, dir: &Path) -> Result<PathBuf> {
        let files = persist::write_frames(dir, &self.checked_frames)?;
        let checked = self
            .checked_frames
            .iter()
            .zip(files)
            .map(|(frame, file)| CheckedFrameReport {
                seq: frame.seq,
                timestamp: frame.timestamp,
                age_ms: self.age_ms(frame),
                file: file.file,
                matched: self
                    .matched_frame
                    .as_ref()
                    .is_some_and(|m| m.seq == frame.seq && m.timestamp == frame.timestamp),
            })
            .collect();

        let report = DiagnosticsReport {
            passed: self.passed,
            summary: self.summary(),
            expectation: &self.expectation,
            action_timestamp: self.action_timestamp,
            evaluated_at: self.evaluated_at,
            recency_window_ms: self.recency_window_ms,
            source: self.source,
            frames_since_action: self.frames_since_action,
            checked,
            matcher_errors: &self.matcher_errors,
        };
        let path = dir.join(REPORT_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&report)?)?;
        Ok(path)
    }
}

#[derive(Serialize)]
struct DiagnosticsReport<'a> {
    passed: bool,
    summary: String,
    expectation: &'a Expectation,
    action_timestamp: f64,
    evaluated_at: f64,
    recency_window_ms: u64,
    source: CandidateSource,
    frames_since_action: usize,
    checked: Vec<CheckedFrameReport>,
    matcher_errors: &'a [MatcherError],
}

#[derive(Serialize)]
struct CheckedFrameReport {
    seq: u64,
    timestamp: f64,
    age_ms: f64,
    file: String,
    matched: bool,
}

/// Candidates among `frames` (oldest first, all at or after the action):
/// every frame within the recency window of `now`, plus the newest frame
/// regardless of age. Returned newest first.
pub fn select_candidates(frames: &[Frame], now: f64, recency_window_ms: u64) -> Vec<Frame> {
    let window = recency_window_ms as f64;
    let last = frames.len().saturating_sub(1);
    frames
        .iter()
        .enumerate()
        .rev()
        .filter(|(i, frame)| *i == last || (now - frame.timestamp) * 1000.0 <= window)
        .map(|(_, frame)| frame.clone())
        .collect()
}

pub struct Verifier {
    matcher: Arc<dyn StateMatcher>,
    clock: Arc<dyn Clock>,
    config: VerifyConfig,
    logger: Logger,
    fallback: Option<Mutex<BoundedCapture>>,
}

impl Verifier {
    pub fn new(
        matcher: Arc<dyn StateMatcher>,
        clock: Arc<dyn Clock>,
        config: VerifyConfig,
        logger: Logger,
    ) -> Self {
        Self {
            matcher,
            clock,
            config,
            logger: logger.component("verify"),
            fallback: None,
        }
    }

    /// On-demand capture used when the buffer cannot answer.
    pub fn with_fallback(mut self, capture: Arc<dyn FrameCapture>) -> Self {
        let timeout = Duration::from_millis(self.config.fallback_timeout_ms);
        self.fallback = Some(Mutex::new(BoundedCapture::new(capture, timeout)));
        self
    }

    /// Request with the configured recency window.
    pub fn request(&self, expectation: Expectation, action_timestamp: f64) -> VerificationRequest {
        VerificationRequest::new(expectation, action_timestamp, self.config.recency_window_ms)
    }

    /// Checks the buffered frames at or after the action. A degraded buffer
    /// or an empty window goes to a fresh capture; when that is not
    /// possible, a non-empty buffer still has its most recent frame checked.
    pub fn verify(
        &self,
        request: &VerificationRequest,
        ring: &FrameRing,
    ) -> Result<VerificationResult> {
        let status = ring.status();
        let frames = ring.frames_since(request.action_timestamp);

        if !status.is_degraded() && !frames.is_empty() {
            return Ok(self.evaluate(request, &frames, CandidateSource::Buffer));
        }

        if status.is_degraded() {
            self.logger.warn(format!(
                "buffer {} is degraded; verifying against a fresh capture",
                ring.session_id()
            ));
        } else {
            self.logger.warn(format!(
                "no buffered frame at or after t={:.3}; verifying against a fresh capture",
                request.action_timestamp
            ));
        }

        let fresh_err = match self.verify_fresh(request, frames.len()) {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let buffered = if frames.is_empty() {
            ring.latest().into_iter().collect()
        } else {
            frames
        };
        if buffered.is_empty() {
            return Err(fresh_err);
        }

        self.logger.warn(format!(
            "fresh capture unavailable ({fresh_err}); checking buffered frames instead"
        ));
        let mut result = self.evaluate(request, &buffered, CandidateSource::Buffer);
        result.frames_since_action = ring.frames_since(request.action_timestamp).len();
        Ok(result)
    }

    /// Verifies against an already materialized frame list, e.g. frames
    /// loaded from preserved artifacts. No fallback capture is attempted.
    pub fn verify_frames(
        &self,
        request: &VerificationRequest,
        frames: &[Frame],
    ) -> VerificationResult {
        let since: Vec<Frame> = frames
            .iter()
            .filter(|frame| frame.timestamp >= request.action_timestamp)
            .cloned()
            .collect();
        self.evaluate(request, &since, CandidateSource::Buffer)
    }

    fn verify_fresh(
        &self,
        request: &VerificationRequest,
        frames_since_action: usize,
    ) -> Result<VerificationResult> {
        let fallback = self.fallback.as_ref().ok_or(Error::NoFallbackCapture {
            action_timestamp: request.action_timestamp,
        })?;
        let timestamp = self.clock.now();
        let bytes = fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture()?;
        let frame = Frame {
            seq: 0,
            timestamp,
            image: FrameImage::from(bytes),
        };

        let mut result = self.evaluate(request, &[frame], CandidateSource::FreshCapture);
        result.frames_since_action = frames_since_action;
        Ok(result)
    }

    fn evaluate(
        &self,
        request: &VerificationRequest,
        frames: &[Frame],
        source: CandidateSource,
    ) -> VerificationResult {
        let evaluated_at = self.clock.now();
        let candidates = match source {
            CandidateSource::Buffer => {
                select_candidates(frames, evaluated_at, request.recency_window_ms)
            }
            CandidateSource::FreshCapture => frames.to_vec(),
        };

        let mut checked_frames = Vec::with_capacity(candidates.len());
        let mut matcher_errors = Vec::new();
        let mut matched_frame = None;
        for frame in candidates {
            let verdict = self.matcher.matches(frame.image.bytes(), &request.expectation);
            checked_frames.push(frame.clone());
            match verdict {
                Ok(true) => {
                    matched_frame = Some(frame);
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    self.logger.warn(format!(
                        "matcher failed on frame #{} (t={:.3}): {err:#}",
                        frame.seq, frame.timestamp
                    ));
                    matcher_errors.push(MatcherError {
                        seq: frame.seq,
                        timestamp: frame.timestamp,
                        message: format!("{err:#}"),
                    });
                }
            }
        }

        let result = VerificationResult {
            passed: matched_frame.is_some(),
            expectation: request.expectation.clone(),
            action_timestamp: request.action_timestamp,
            evaluated_at,
            recency_window_ms: request.recency_window_ms,
            source,
            frames_since_action: frames.len(),
            checked_frames,
            matched_frame,
            matcher_errors,
        };
        self.logger.info(result.summary());
        result
    }
}
