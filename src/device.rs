use std::{
    io::{BufReader, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
    sync::{
        mpsc::{self, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, Context};
use regex::Regex;

use crate::{
    clock::Clock,
    config::BufferConfig,
    error::{Error, Result},
    gesture::{getevent::GeteventLog, parse_axis_range, AxisRange, ScreenSize},
    types::{Expectation, RawEvent},
};

/// Produces one encoded screenshot per call.
pub trait FrameCapture: Send + Sync {
    fn capture(&self) -> anyhow::Result<Vec<u8>>;
}

/// Decides whether an image shows the expected state. Implementations may be
/// slow; the verifier calls it as few times as possible.
pub trait StateMatcher: Send + Sync {
    fn matches(&self, image: &[u8], expectation: &Expectation) -> anyhow::Result<bool>;
}

pub trait EventSource {
    /// Raw axis maxima, queried once before parsing.
    fn axis_range(&mut self) -> anyhow::Result<Option<AxisRange>>;
    fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>>;
}

impl<F> FrameCapture for F
where
    F: Fn() -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn capture(&self) -> anyhow::Result<Vec<u8>> {
        self()
    }
}

type CaptureReply = mpsc::Receiver<anyhow::Result<Vec<u8>>>;

/// Runs captures on a helper thread and gives up after `timeout`.
///
/// At most one helper is outstanding at a time: after a timeout the helper
/// is kept as pending, and further calls fail with [`Error::CaptureBusy`]
/// until it returns. Its late result is discarded.
pub struct BoundedCapture {
    capture: Arc<dyn FrameCapture>,
    timeout: Duration,
    pending: Option<CaptureReply>,
}

impl BoundedCapture {
    pub fn new(capture: Arc<dyn FrameCapture>, timeout: Duration) -> Self {
        Self {
            capture,
            timeout,
            pending: None,
        }
    }

    /// True while a timed-out capture has not returned yet.
    pub fn is_busy(&mut self) -> bool {
        let Some(reply) = &self.pending else {
            return false;
        };
        match reply.try_recv() {
            Err(TryRecvError::Empty) => true,
            Ok(_) | Err(TryRecvError::Disconnected) => {
                self.pending = None;
                false
            }
        }
    }

    pub fn capture(&mut self) -> Result<Vec<u8>> {
        if self.is_busy() {
            return Err(Error::CaptureBusy);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let worker = Arc::clone(&self.capture);
        thread::Builder::new()
            .name("uiverify-capture".into())
            .spawn(move || {
                let _ = tx.send(worker.capture());
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(bytes)) if bytes.is_empty() => {
                Err(Error::Capture("capture returned no bytes".into()))
            }
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => Err(Error::Capture(format!("{err:#}"))),
            Err(RecvTimeoutError::Timeout) => {
                self.pending = Some(rx);
                Err(Error::CaptureTimeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Capture(
                "capture worker exited without a result".into(),
            )),
        }
    }
}

/// One-off bounded capture.
pub fn capture_with_timeout(
    capture: &Arc<dyn FrameCapture>,
    timeout: Duration,
) -> Result<Vec<u8>> {
    BoundedCapture::new(Arc::clone(capture), timeout).capture()
}

impl<F> StateMatcher for F
where
    F: Fn(&[u8], &Expectation) -> anyhow::Result<bool> + Send + Sync,
{
    fn matches(&self, image: &[u8], expectation: &Expectation) -> anyhow::Result<bool> {
        self(image, expectation)
    }
}

/// Android device reached through `adb`.
#[derive(Clone, Debug)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: String,
    timeout: Duration,
}

impl AdbDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            adb: PathBuf::from("adb"),
            serial: serial.into(),
            timeout: Duration::from_millis(BufferConfig::default().capture_timeout_ms),
        }
    }

    pub fn with_adb(mut self, adb: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self
    }

    /// Deadline for one-shot adb commands; the child is killed when it
    /// passes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.adb);
        command.arg("-s").arg(&self.serial);
        command
    }

    fn run_bounded(&self, args: &[&str]) -> anyhow::Result<Vec<u8>> {
        let what = args.join(" ");
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start `{what}` on {}", self.serial))?;
        let mut stdout = child.stdout.take().context("adb child has no stdout pipe")?;
        let mut stderr = child.stderr.take().context("adb child has no stderr pipe")?;

        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("uiverify-adb-read".into())
            .spawn(move || {
                let mut out = Vec::new();
                let mut err = Vec::new();
                let read = stdout
                    .read_to_end(&mut out)
                    .and_then(|_| stderr.read_to_end(&mut err));
                let _ = tx.send(read.map(|_| (out, err)));
            })?;

        let (out, err) = match rx.recv_timeout(self.timeout) {
            Ok(read) => read.with_context(|| format!("failed to read `{what}` output"))?,
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "`{what}` on {} did not finish within {:?}; killed",
                    self.serial,
                    self.timeout
                );
            }
        };
        let status = child
            .wait()
            .with_context(|| format!("failed to wait for `{what}`"))?;
        if !status.success() {
            bail!(
                "`{what}` on {} exited with {status}: {}",
                self.serial,
                String::from_utf8_lossy(&err).trim()
            );
        }
        Ok(out)
    }

    pub fn probe_axis_range(&self) -> anyhow::Result<Option<AxisRange>> {
        let output = self.run_bounded(&["shell", "getevent", "-lp"])?;
        Ok(parse_axis_range(&String::from_utf8_lossy(&output)))
    }

    /// Display size from `wm size`; an override size wins over the
    /// physical one.
    pub fn screen_size(&self) -> anyhow::Result<Option<ScreenSize>> {
        let output = self.run_bounded(&["shell", "wm", "size"])?;
        Ok(parse_wm_size(&String::from_utf8_lossy(&output))?)
    }

    /// Starts `getevent -lt` and returns a live event source over its
    /// output, stamped on `clock`. The child is killed when the returned
    /// stream is dropped.
    pub fn event_stream(&self, clock: Arc<dyn Clock>) -> anyhow::Result<AdbEventStream> {
        let axis = self.probe_axis_range()?;
        let mut child = self
            .command()
            .args(["shell", "getevent", "-lt"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start getevent on {}", self.serial))?;
        let stdout = child
            .stdout
            .take()
            .context("getevent child has no stdout pipe")?;
        let log = GeteventLog::new(BufReader::new(stdout), axis)?;
        Ok(AdbEventStream {
            child,
            events: HostTimeline::new(log, clock),
        })
    }
}

impl FrameCapture for AdbDevice {
    fn capture(&self) -> anyhow::Result<Vec<u8>> {
        self.run_bounded(&["exec-out", "screencap", "-p"])
    }
}

pub fn parse_wm_size(text: &str) -> Result<Option<ScreenSize>> {
    let pattern = Regex::new(r"(?m)^\s*(Physical|Override) size:\s*(\d+)x(\d+)")?;
    let mut physical = None;
    for caps in pattern.captures_iter(text) {
        let (Ok(width), Ok(height)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>()) else {
            continue;
        };
        let size = ScreenSize { width, height };
        if &caps[1] == "Override" {
            return Ok(Some(size));
        }
        physical.get_or_insert(size);
    }
    Ok(physical)
}

/// Re-stamps events onto the host clock. `getevent` reports kernel uptime;
/// frames are stamped with [`Clock::now`], so live gestures need the same
/// time base. The offset is fixed at the first event.
pub struct HostTimeline<S> {
    inner: S,
    clock: Arc<dyn Clock>,
    offset: Option<f64>,
}

impl<S: EventSource> HostTimeline<S> {
    pub fn new(inner: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            offset: None,
        }
    }
}

impl<S: EventSource> EventSource for HostTimeline<S> {
    fn axis_range(&mut self) -> anyhow::Result<Option<AxisRange>> {
        self.inner.axis_range()
    }

    fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        let Some(mut event) = self.inner.next_event()? else {
            return Ok(None);
        };
        if event.timestamp.is_finite() {
            let offset = match self.offset {
                Some(offset) => offset,
                None => {
                    let offset = self.clock.now() - event.timestamp;
                    self.offset = Some(offset);
                    offset
                }
            };
            event.timestamp += offset;
        }
        Ok(Some(event))
    }
}

pub struct AdbEventStream {
    child: Child,
    events: HostTimeline<GeteventLog<BufReader<ChildStdout>>>,
}

impl EventSource for AdbEventStream {
    fn axis_range(&mut self) -> anyhow::Result<Option<AxisRange>> {
        self.events.axis_range()
    }

    fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        self.events.next_event()
    }
}

impl Drop for AdbEventStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
