use std::collections::BTreeSet;

use crate::{
    change::ChangeDetector,
    config::CheckpointConfig,
    gesture::ScreenSize,
    logging::Logger,
    types::{Checkpoint, CheckpointReason, Frame, Gesture, GestureKind},
};

/// Ranks recorded gestures by how useful a verification step after them
/// would be.
pub struct CheckpointScorer {
    config: CheckpointConfig,
    detector: ChangeDetector,
    screen: ScreenSize,
    logger: Logger,
}

impl CheckpointScorer {
    pub fn new(
        config: CheckpointConfig,
        detector: ChangeDetector,
        screen: ScreenSize,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            detector,
            screen,
            logger: logger.component("checkpoint"),
        }
    }

    /// Gestures with at least one signal, highest score first. Equal
    /// scores keep gesture order.
    pub fn score(&self, gestures: &[Gesture], frames: &[Frame]) -> Vec<Checkpoint> {
        let mut timeline: Vec<&Frame> = frames.iter().collect();
        timeline.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mut ranked: Vec<Checkpoint> = gestures
            .iter()
            .enumerate()
            .filter_map(|(index, gesture)| {
                let mut reasons = BTreeSet::new();
                if self.screen_changed(gesture, &timeline) {
                    reasons.insert(CheckpointReason::ScreenChanged);
                }
                if let Some(next) = gestures.get(index + 1) {
                    if next.timestamp - gesture.timestamp >= self.config.long_wait_secs {
                        reasons.insert(CheckpointReason::LongWait);
                    }
                }
                if self.navigation_like(gesture) {
                    reasons.insert(CheckpointReason::NavigationLike);
                }

                let score = reasons.iter().map(|reason| self.weight(*reason)).sum::<u32>();
                (score > 0).then_some(Checkpoint {
                    gesture_index: index,
                    timestamp: gesture.timestamp,
                    score,
                    reasons,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// Greedy pick from a ranking: skips anything within `min_spacing`
    /// gestures of an already picked checkpoint, stops at `top_k`, and
    /// returns the picks in gesture order.
    pub fn select(&self, ranked: &[Checkpoint]) -> Vec<Checkpoint> {
        let mut selected: Vec<Checkpoint> = Vec::new();
        for candidate in ranked {
            if selected.len() >= self.config.top_k {
                break;
            }
            let crowded = selected.iter().any(|picked| {
                picked.gesture_index.abs_diff(candidate.gesture_index) < self.config.min_spacing
            });
            if !crowded {
                selected.push(candidate.clone());
            }
        }
        selected.sort_by_key(|checkpoint| checkpoint.gesture_index);
        selected
    }

    pub fn checkpoints(&self, gestures: &[Gesture], frames: &[Frame]) -> Vec<Checkpoint> {
        let ranked = self.score(gestures, frames);
        let selected = self.select(&ranked);
        self.logger.info(format!(
            "{} of {} gestures carry a signal; selected {} checkpoints",
            ranked.len(),
            gestures.len(),
            selected.len()
        ));
        selected
    }

    fn weight(&self, reason: CheckpointReason) -> u32 {
        match reason {
            CheckpointReason::ScreenChanged => self.config.screen_change_weight,
            CheckpointReason::LongWait => self.config.long_wait_weight,
            CheckpointReason::NavigationLike => self.config.navigation_weight,
        }
    }

    fn screen_changed(&self, gesture: &Gesture, timeline: &[&Frame]) -> bool {
        let split = timeline.partition_point(|frame| frame.timestamp < gesture.timestamp);
        let (Some(before), Some(after)) = (
            split.checked_sub(1).and_then(|i| timeline.get(i)),
            timeline.get(split),
        ) else {
            return false;
        };
        match self.detector.changed(before, after) {
            Ok(changed) => changed,
            Err(err) => {
                self.logger.warn(format!(
                    "ignoring frames #{}/#{} around t={:.3}: {err}",
                    before.seq, after.seq, gesture.timestamp
                ));
                false
            }
        }
    }

    fn navigation_like(&self, gesture: &Gesture) -> bool {
        if gesture.kind != GestureKind::Tap {
            return false;
        }
        let x_pct = gesture.x / f64::from(self.screen.width) * 100.0;
        let y_pct = gesture.y / f64::from(self.screen.height) * 100.0;
        let back_zone = x_pct < self.config.back_zone_x_pct && y_pct < self.config.back_zone_y_pct;
        back_zone || y_pct > self.config.bottom_strip_y_pct
    }
}
