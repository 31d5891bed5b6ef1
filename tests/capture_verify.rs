//! End-to-end flow over the public API: classify a recorded contact, buffer
//! a live capture session, verify a transient state, then re-verify from the
//! preserved artifacts.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use uiverify::{
    buffer::load_artifacts,
    config::{BufferConfig, VerifyConfig},
    AxisRange, Calibration, CandidateSource, CaptureService, Clock, Expectation, FrameCapture,
    GestureKind, Logger, ManualClock, RawEvent, Retention, ScreenSize, SessionStatus,
    StateMatcher, Verifier,
};

const TICK_SECS: f64 = 0.15;
const TICKS: u64 = 13;

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Screenshots tagged with their tick index; the clock moves one interval per
/// capture and the device goes quiet after `TICKS` frames.
fn scripted_device(clock: Arc<ManualClock>) -> (Arc<dyn FrameCapture>, Arc<AtomicU64>) {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let capture: Arc<dyn FrameCapture> = Arc::new(move || -> anyhow::Result<Vec<u8>> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n >= TICKS {
            anyhow::bail!("device asleep");
        }
        clock.advance(TICK_SECS);
        Ok(vec![n as u8, 0xAB, 0xCD])
    });
    (capture, calls)
}

fn toast_matcher() -> Arc<dyn StateMatcher> {
    Arc::new(|image: &[u8], expectation: &Expectation| -> anyhow::Result<bool> {
        assert_eq!(expectation, &Expectation::text("Saved toast visible"));
        Ok(image[0] == 9)
    })
}

#[test]
fn recorded_tap_becomes_one_gesture() {
    let calibration = Calibration::new(
        AxisRange {
            max_x: 1080,
            max_y: 2400,
        },
        ScreenSize {
            width: 1080,
            height: 2400,
        },
    )
    .expect("calibration");
    let events = [
        RawEvent::touch_down(0.0),
        RawEvent::position_x(0.0, 500),
        RawEvent::position_y(0.0, 1000),
        RawEvent::touch_up(0.15),
    ];

    let gestures = uiverify::classify(&events, &calibration);
    assert_eq!(gestures.len(), 1);
    assert_eq!(gestures[0].kind, GestureKind::Tap);
    assert_eq!((gestures[0].x, gestures[0].y), (500.0, 1000.0));
    assert!((gestures[0].timestamp - 0.15).abs() < 1e-9);
}

#[test]
fn transient_state_is_caught_from_live_buffer() {
    let clock = Arc::new(ManualClock::new(0.0));
    let service = CaptureService::new(
        BufferConfig {
            degraded_after_failures: u32::MAX,
            ..BufferConfig::default()
        },
        Arc::clone(&clock) as Arc<dyn Clock>,
        Logger::quiet(),
    );
    let (capture, calls) = scripted_device(Arc::clone(&clock));

    let mut session = service
        .start("login-flow", "emulator-5554", 2, capture)
        .expect("start session");
    assert!(wait_until(Duration::from_secs(10), || calls.load(Ordering::SeqCst) > TICKS));

    let artifacts = tempfile::tempdir().expect("tempdir");
    let outcome = session
        .stop(Retention::Preserve(artifacts.path().to_path_buf()))
        .expect("stop");
    assert_eq!(outcome.manifest.status, SessionStatus::Stopped);
    assert!(outcome.manifest.frames.len() >= 12);
    assert!(!service.is_active("emulator-5554"));

    // Verification runs shortly after the last capture.
    clock.set(1.8);
    let verifier = Verifier::new(
        toast_matcher(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        VerifyConfig::default(),
        Logger::quiet(),
    );
    let request = verifier.request(Expectation::text("Saved toast visible"), 1.0);
    let result = verifier.verify(&request, session.ring()).expect("verify");

    assert!(result.passed, "{}", result.summary());
    assert_eq!(result.source, CandidateSource::Buffer);
    let matched = result.matched_frame.as_ref().expect("matched frame");
    assert!((matched.timestamp - 1.35).abs() < 1e-6);
    assert!(result
        .checked_frames
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));

    let (persisted, frames) = load_artifacts(artifacts.path()).expect("load artifacts");
    assert_eq!(persisted.session_id, "login-flow");
    assert_eq!(frames.len(), outcome.manifest.frames.len());

    let replayed = verifier.verify_frames(&request, &frames);
    assert!(replayed.passed);
    assert_eq!(
        replayed.matched_frame.map(|frame| frame.seq),
        Some(matched.seq)
    );
}

#[test]
fn verification_never_hangs_on_an_empty_buffer() {
    let clock = Arc::new(ManualClock::new(50.0));
    let service = CaptureService::new(
        BufferConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Logger::quiet(),
    );
    let offline: Arc<dyn FrameCapture> =
        Arc::new(|| -> anyhow::Result<Vec<u8>> { anyhow::bail!("no device") });
    let mut session = service
        .start("offline", "dev-x", 5, offline)
        .expect("start session");

    let verifier = Verifier::new(
        toast_matcher(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        VerifyConfig::default(),
        Logger::quiet(),
    );
    let request = verifier.request(Expectation::text("Saved toast visible"), 49.0);
    let err = verifier
        .verify(&request, session.ring())
        .expect_err("no frames and no fallback");
    assert!(matches!(err, uiverify::Error::NoFallbackCapture { .. }));

    session.stop(Retention::Discard).expect("stop");
}
