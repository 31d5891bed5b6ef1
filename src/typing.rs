//! Keyboard typing detection over recorded gestures: runs of quick taps in
//! the keyboard region that land on different keys.

use serde::{Deserialize, Serialize};

use crate::{
    config::TypingConfig,
    gesture::ScreenSize,
    logging::Logger,
    types::{Gesture, GestureKind},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypingSequence {
    /// Gesture indices of the first and last tap, inclusive.
    pub start_index: usize,
    pub end_index: usize,
    pub tap_count: usize,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub duration_ms: u64,
    /// Standard deviation of the tap x coordinates, in pixels.
    pub x_spread: f64,
}

pub struct TypingDetector {
    config: TypingConfig,
    screen: ScreenSize,
    logger: Logger,
}

impl TypingDetector {
    pub fn new(config: TypingConfig, screen: ScreenSize, logger: Logger) -> Self {
        Self {
            config,
            screen,
            logger: logger.component("typing"),
        }
    }

    pub fn detect(&self, gestures: &[Gesture]) -> Vec<TypingSequence> {
        let mut sequences = Vec::new();
        let mut run: Vec<(usize, &Gesture)> = Vec::new();

        for (index, gesture) in gestures.iter().enumerate() {
            if !self.is_key_press(gesture) {
                self.close_run(&mut run, &mut sequences);
                continue;
            }
            let paused = run.last().is_some_and(|(_, last)| {
                gesture.timestamp - last.timestamp > self.config.max_gap_secs
            });
            if paused {
                self.close_run(&mut run, &mut sequences);
            }
            run.push((index, gesture));
        }
        self.close_run(&mut run, &mut sequences);

        self.logger.info(format!(
            "{} typing sequences in {} gestures",
            sequences.len(),
            gestures.len()
        ));
        sequences
    }

    fn is_key_press(&self, gesture: &Gesture) -> bool {
        let y_pct = gesture.y / f64::from(self.screen.height) * 100.0;
        gesture.kind == GestureKind::Tap && y_pct > self.config.keyboard_top_pct
    }

    fn close_run(&self, run: &mut Vec<(usize, &Gesture)>, out: &mut Vec<TypingSequence>) {
        if run.len() >= self.config.min_taps {
            let spread = x_spread(run.iter().map(|(_, gesture)| gesture.x));
            if spread >= self.config.min_x_spread_px {
                if let (Some((start_index, first)), Some((end_index, last))) =
                    (run.first(), run.last())
                {
                    out.push(TypingSequence {
                        start_index: *start_index,
                        end_index: *end_index,
                        tap_count: run.len(),
                        start_timestamp: first.timestamp,
                        end_timestamp: last.timestamp,
                        duration_ms: ((last.timestamp - first.timestamp) * 1000.0).round() as u64,
                        x_spread: spread,
                    });
                }
            }
        }
        run.clear();
    }
}

fn x_spread(xs: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = xs.clone().count();
    if count < 2 {
        return 0.0;
    }
    let mean = xs.clone().sum::<f64>() / count as f64;
    let variance = xs.map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;
    variance.sqrt()
}
