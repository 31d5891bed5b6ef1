//! Touch gesture classification over raw device input events.

mod core;
pub mod getevent;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

pub use self::core::classify_contact;
pub use self::getevent::{parse_axis_range, GeteventLog, GeteventParser};

use self::core::{ContactEngine, ContactInput};
use crate::{
    config::GestureThresholds,
    device::EventSource,
    error::{Error, Result},
    logging::Logger,
    types::{EventCode, Gesture, RawEvent},
};

/// Raw coordinate maxima reported by the touch controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRange {
    pub max_x: i64,
    pub max_y: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Maps raw controller coordinates onto screen pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    axis: AxisRange,
    screen: ScreenSize,
}

impl Calibration {
    pub fn new(axis: AxisRange, screen: ScreenSize) -> Result<Self> {
        if axis.max_x <= 0 || axis.max_y <= 0 {
            return Err(Error::InvalidCalibration(format!(
                "raw axis maxima must be positive, got x={} y={}",
                axis.max_x, axis.max_y
            )));
        }
        if screen.width == 0 || screen.height == 0 {
            return Err(Error::InvalidCalibration(format!(
                "screen size must be non-zero, got {}x{}",
                screen.width, screen.height
            )));
        }
        Ok(Self { axis, screen })
    }

    /// Queries the source once for its axis maxima.
    pub fn probe(source: &mut dyn EventSource, screen: ScreenSize) -> Result<Self> {
        let axis = source
            .axis_range()
            .map_err(|err| Error::InvalidCalibration(format!("axis probe failed: {err:#}")))?;
        match axis {
            Some(axis) => Self::new(axis, screen),
            None => Err(Error::MissingCalibration { axis: "x/y" }),
        }
    }

    pub fn axis(&self) -> AxisRange {
        self.axis
    }

    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    pub fn screen_x(&self, raw: i64) -> Option<f64> {
        scale(raw, self.axis.max_x, self.screen.width)
    }

    pub fn screen_y(&self, raw: i64) -> Option<f64> {
        scale(raw, self.axis.max_y, self.screen.height)
    }
}

fn scale(raw: i64, raw_max: i64, dimension: u32) -> Option<f64> {
    if !(0..=raw_max).contains(&raw) {
        return None;
    }
    Some(raw as f64 / raw_max as f64 * f64::from(dimension))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub emitted: u64,
    pub skipped: u64,
    /// A contact was still down when input ended; it produced no gesture.
    pub open_contact: bool,
}

/// Incremental classifier: feed events one at a time as they arrive.
pub struct GestureStream {
    calibration: Calibration,
    engine: ContactEngine,
    logger: Logger,
    emitted: u64,
    skipped: u64,
}

impl GestureStream {
    pub fn new(calibration: Calibration, thresholds: GestureThresholds, logger: Logger) -> Self {
        Self {
            calibration,
            engine: ContactEngine::new(thresholds),
            logger: logger.component("gesture"),
            emitted: 0,
            skipped: 0,
        }
    }

    pub fn push(&mut self, event: &RawEvent) -> Option<Gesture> {
        if !event.timestamp.is_finite() {
            self.skip(format!("event with non-finite timestamp {}", event.timestamp));
            return None;
        }

        let input = match &event.code {
            EventCode::PositionX => match self.calibration.screen_x(event.value) {
                Some(x) => ContactInput::X { x },
                None => {
                    self.skip(format!(
                        "x={} outside [0, {}] at t={:.3}",
                        event.value,
                        self.calibration.axis.max_x,
                        event.timestamp
                    ));
                    return None;
                }
            },
            EventCode::PositionY => match self.calibration.screen_y(event.value) {
                Some(y) => ContactInput::Y { y },
                None => {
                    self.skip(format!(
                        "y={} outside [0, {}] at t={:.3}",
                        event.value,
                        self.calibration.axis.max_y,
                        event.timestamp
                    ));
                    return None;
                }
            },
            EventCode::Touch => match event.value {
                1 => ContactInput::Begin {
                    at: event.timestamp,
                },
                0 => ContactInput::End {
                    at: event.timestamp,
                },
                other => {
                    self.skip(format!(
                        "touch key value {other} at t={:.3}",
                        event.timestamp
                    ));
                    return None;
                }
            },
            EventCode::SyncReport => ContactInput::Sync,
            EventCode::Other(_) => return None,
        };

        let output = self.engine.handle(input);
        if let Some(rejection) = output.rejection {
            self.skip(rejection.to_string());
        }
        if output.gesture.is_some() {
            self.emitted += 1;
        }
        output.gesture
    }

    /// Ends the stream. An open contact is reported, never turned into a
    /// gesture.
    pub fn finish(&self) -> StreamStats {
        let open_contact = self.engine.is_touching();
        if open_contact {
            self.logger
                .warn("input ended with a contact still down; no gesture emitted for it");
        }
        StreamStats {
            emitted: self.emitted,
            skipped: self.skipped,
            open_contact,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Folds a complete log through this stream.
    pub fn classify_all(mut self, events: &[RawEvent]) -> Vec<Gesture> {
        let gestures = events.iter().filter_map(|event| self.push(event)).collect();
        self.finish();
        gestures
    }

    fn skip(&mut self, reason: String) {
        self.skipped += 1;
        self.logger.warn(format!("skipping malformed event: {reason}"));
    }
}

/// Batch classification with default thresholds.
pub fn classify(events: &[RawEvent], calibration: &Calibration) -> Vec<Gesture> {
    GestureStream::new(*calibration, GestureThresholds::default(), Logger::quiet())
        .classify_all(events)
}

/// Probes `source` for calibration, then drains it through a stream.
pub fn classify_source(
    source: &mut dyn EventSource,
    screen: ScreenSize,
    thresholds: GestureThresholds,
    logger: Logger,
) -> anyhow::Result<(Vec<Gesture>, StreamStats)> {
    let calibration = Calibration::probe(source, screen)?;
    let mut stream = GestureStream::new(calibration, thresholds, logger);
    let mut gestures = Vec::new();
    while let Some(event) = source.next_event()? {
        if let Some(gesture) = stream.push(&event) {
            gestures.push(gesture);
        }
    }
    let stats = stream.finish();
    Ok((gestures, stats))
}
