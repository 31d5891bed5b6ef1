use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{persist, FrameRing};
use crate::{
    clock::Clock,
    config::BufferConfig,
    device::{BoundedCapture, FrameCapture},
    error::{Error, Result},
    logging::Logger,
    types::{BufferManifest, SessionStatus},
};

/// What to do with buffered frames when a session stops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retention {
    Discard,
    Preserve(PathBuf),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopOutcome {
    pub manifest: BufferManifest,
    pub preserved_to: Option<PathBuf>,
}

type ActiveDevices = Arc<Mutex<HashSet<String>>>;

/// Starts capture sessions, at most one per device.
#[derive(Clone)]
pub struct CaptureService {
    config: BufferConfig,
    clock: Arc<dyn Clock>,
    logger: Logger,
    active: ActiveDevices,
}

impl CaptureService {
    pub fn new(config: BufferConfig, clock: Arc<dyn Clock>, logger: Logger) -> Self {
        Self {
            config,
            clock,
            logger: logger.component("buffer"),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_active(&self, device_ref: &str) -> bool {
        lock_active(&self.active).contains(device_ref)
    }

    pub fn start(
        &self,
        session_id: &str,
        device_ref: &str,
        interval_ms: u64,
        capture: Arc<dyn FrameCapture>,
    ) -> Result<CaptureSession> {
        if interval_ms == 0 {
            return Err(Error::InvalidConfig("capture interval must be > 0 ms".into()));
        }
        if !lock_active(&self.active).insert(device_ref.to_owned()) {
            return Err(Error::SessionAlreadyActive(device_ref.to_owned()));
        }

        let ring = Arc::new(FrameRing::new(
            session_id,
            device_ref,
            self.clock.now(),
            interval_ms,
            self.config.max_frames,
        ));
        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = CaptureWorker {
            ring: Arc::clone(&ring),
            capture: BoundedCapture::new(
                capture,
                Duration::from_millis(self.config.capture_timeout_ms),
            ),
            clock: Arc::clone(&self.clock),
            logger: self.logger.clone(),
            interval: Duration::from_millis(interval_ms),
            degraded_after: self.config.degraded_after_failures,
        };

        let handle = match thread::Builder::new()
            .name(format!("uiverify-buffer-{session_id}"))
            .spawn(move || worker.run(stop_rx))
        {
            Ok(handle) => handle,
            Err(err) => {
                lock_active(&self.active).remove(device_ref);
                return Err(err.into());
            }
        };

        self.logger.info(format!(
            "session {session_id} started on {device_ref}: every {interval_ms} ms, up to {} frames",
            self.config.max_frames
        ));

        Ok(CaptureSession {
            ring,
            device_ref: device_ref.to_owned(),
            stop_tx: Some(stop_tx),
            worker: Some(handle),
            active: Arc::clone(&self.active),
            logger: self.logger.clone(),
            outcome: None,
        })
    }
}

fn lock_active(active: &ActiveDevices) -> std::sync::MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CaptureWorker {
    ring: Arc<FrameRing>,
    capture: BoundedCapture,
    clock: Arc<dyn Clock>,
    logger: Logger,
    interval: Duration,
    degraded_after: u32,
}

impl CaptureWorker {
    fn run(mut self, stop: mpsc::Receiver<()>) {
        loop {
            let tick = Instant::now();
            self.tick();

            let wait = self.interval.saturating_sub(tick.elapsed());
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn tick(&mut self) {
        let timestamp = self.clock.now();
        match self.capture.capture() {
            Ok(bytes) => {
                let was_degraded = self.ring.status().is_degraded();
                self.ring.push(timestamp, bytes.into());
                if was_degraded {
                    self.logger.info("capture recovered; session capturing again");
                }
            }
            Err(err) => {
                let before = self.ring.status();
                let after = self.ring.record_failure(self.degraded_after);
                self.logger.warn(format!("capture tick skipped: {err}"));
                if let (false, SessionStatus::Degraded { consecutive_failures }) =
                    (before.is_degraded(), after)
                {
                    self.logger.error(format!(
                        "session degraded after {consecutive_failures} consecutive capture failures"
                    ));
                }
            }
        }
    }
}

/// Handle to a running capture session. Dropping it stops the session and
/// discards its frames.
pub struct CaptureSession {
    ring: Arc<FrameRing>,
    device_ref: String,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    active: ActiveDevices,
    logger: Logger,
    outcome: Option<StopOutcome>,
}

impl CaptureSession {
    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    pub fn device_ref(&self) -> &str {
        &self.device_ref
    }

    pub fn status(&self) -> SessionStatus {
        self.ring.status()
    }

    /// Stops capture and finalizes the manifest. Calling it again returns
    /// the first outcome unchanged.
    pub fn stop(&mut self, retention: Retention) -> Result<StopOutcome> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        self.halt();

        let (manifest, preserved_to) = match retention {
            Retention::Discard => {
                self.ring.clear();
                (self.ring.manifest(), None)
            }
            Retention::Preserve(dir) => {
                let manifest = self.ring.manifest();
                persist::write_artifacts(&dir, &manifest, &self.ring.snapshot())?;
                self.logger.info(format!(
                    "preserved {} frames of session {} to {}",
                    manifest.frames.len(),
                    manifest.session_id,
                    dir.display()
                ));
                (manifest, Some(dir))
            }
        };

        let outcome = StopOutcome {
            manifest,
            preserved_to,
        };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    fn halt(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                self.logger.error("capture worker panicked");
            }
            self.ring.mark_stopped();
            lock_active(&self.active).remove(&self.device_ref);
            self.logger
                .info(format!("session {} stopped", self.ring.session_id()));
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.halt();
            self.ring.clear();
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device_ref", &self.device_ref)
            .field("status", &self.ring.status())
            .field("frames", &self.ring.len())
            .finish()
    }
}
