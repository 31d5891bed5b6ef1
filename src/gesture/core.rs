use std::fmt;

use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::{
    config::GestureThresholds,
    types::{Gesture, GestureKind, ScreenPoint, SwipeDirection},
};

/// Input to the contact machine; coordinates are already in screen space.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ContactInput {
    X { x: f64 },
    Y { y: f64 },
    Begin { at: f64 },
    End { at: f64 },
    Sync,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Rejection {
    BeginWhileActive { at: f64, started: f64 },
    EndWithoutBegin { at: f64 },
    EndWithoutPosition { at: f64 },
    EndBeforeBegin { at: f64, started: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BeginWhileActive { at, started } => write!(
                f,
                "contact begin at t={at:.3} while contact from t={started:.3} is still active"
            ),
            Rejection::EndWithoutBegin { at } => {
                write!(f, "contact end at t={at:.3} without a matching begin")
            }
            Rejection::EndWithoutPosition { at } => {
                write!(f, "contact ended at t={at:.3} with no known position")
            }
            Rejection::EndBeforeBegin { at, started } => write!(
                f,
                "contact end at t={at:.3} precedes its begin at t={started:.3}"
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ContactOutput {
    pub(crate) gesture: Option<Gesture>,
    pub(crate) rejection: Option<Rejection>,
}

#[derive(Clone, Copy, Debug, Default)]
struct DispatchContext {
    gesture: Option<Gesture>,
    rejection: Option<Rejection>,
}

impl DispatchContext {
    fn emit(&mut self, gesture: Gesture) {
        self.gesture = Some(gesture);
    }

    fn reject(&mut self, rejection: Rejection) {
        self.rejection = Some(rejection);
    }

    fn finish(self) -> ContactOutput {
        ContactOutput {
            gesture: self.gesture,
            rejection: self.rejection,
        }
    }
}

/// Single-contact tracker. Multi-touch slots are not modelled.
pub(crate) struct ContactEngine {
    machine: statig::blocking::StateMachine<ContactHsm>,
    touching: bool,
}

impl ContactEngine {
    pub(crate) fn new(thresholds: GestureThresholds) -> Self {
        Self {
            machine: ContactHsm::new(thresholds).state_machine(),
            touching: false,
        }
    }

    pub(crate) fn handle(&mut self, input: ContactInput) -> ContactOutput {
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&input, &mut context);
        match input {
            ContactInput::Begin { .. } if context.rejection.is_none() => self.touching = true,
            ContactInput::End { .. } => self.touching = false,
            _ => {}
        }
        context.finish()
    }

    pub(crate) fn is_touching(&self) -> bool {
        self.touching
    }
}

struct ContactHsm {
    thresholds: GestureThresholds,
    start_x: Option<f64>,
    start_y: Option<f64>,
    start_time: f64,
    last_x: Option<f64>,
    last_y: Option<f64>,
    origin_pending: bool,
}

impl ContactHsm {
    fn new(thresholds: GestureThresholds) -> Self {
        Self {
            thresholds,
            start_x: None,
            start_y: None,
            start_time: 0.0,
            last_x: None,
            last_y: None,
            origin_pending: false,
        }
    }

    fn begin_contact(&mut self, at: f64) {
        self.start_x = self.last_x;
        self.start_y = self.last_y;
        self.start_time = at;
        self.origin_pending = true;
    }

    fn reset_contact(&mut self) {
        self.start_x = None;
        self.start_y = None;
        self.origin_pending = false;
    }

    fn track_x(&mut self, x: f64) {
        self.last_x = Some(x);
        if self.origin_pending || self.start_x.is_none() {
            self.start_x = Some(x);
        }
    }

    fn track_y(&mut self, y: f64) {
        self.last_y = Some(y);
        if self.origin_pending || self.start_y.is_none() {
            self.start_y = Some(y);
        }
    }

    fn complete_contact(&mut self, context: &mut DispatchContext, at: f64) {
        let (Some(start_x), Some(start_y), Some(end_x), Some(end_y)) =
            (self.start_x, self.start_y, self.last_x, self.last_y)
        else {
            context.reject(Rejection::EndWithoutPosition { at });
            self.reset_contact();
            return;
        };

        if at < self.start_time {
            context.reject(Rejection::EndBeforeBegin {
                at,
                started: self.start_time,
            });
            self.reset_contact();
            return;
        }

        let duration_ms = (at - self.start_time) * 1000.0;
        let start = ScreenPoint {
            x: start_x,
            y: start_y,
        };
        let end = ScreenPoint { x: end_x, y: end_y };
        context.emit(Gesture {
            kind: classify_contact(&self.thresholds, duration_ms, start, end),
            x: end_x,
            y: end_y,
            start_x,
            start_y,
            duration_ms: duration_ms.round() as u64,
            timestamp: at,
        });
        self.reset_contact();
    }
}

#[state_machine(initial = "State::idle()")]
impl ContactHsm {
    #[state]
    fn idle(&mut self, context: &mut DispatchContext, event: &ContactInput) -> Outcome<State> {
        match event {
            ContactInput::X { x } => {
                self.last_x = Some(*x);
                Handled
            }
            ContactInput::Y { y } => {
                self.last_y = Some(*y);
                Handled
            }
            ContactInput::Begin { at } => {
                self.begin_contact(*at);
                Transition(State::touching())
            }
            ContactInput::End { at } => {
                context.reject(Rejection::EndWithoutBegin { at: *at });
                Handled
            }
            ContactInput::Sync => Handled,
        }
    }

    #[state]
    fn touching(&mut self, context: &mut DispatchContext, event: &ContactInput) -> Outcome<State> {
        match event {
            ContactInput::X { x } => {
                self.track_x(*x);
                Handled
            }
            ContactInput::Y { y } => {
                self.track_y(*y);
                Handled
            }
            ContactInput::Sync => {
                // The first report after the begin key carries the origin.
                self.origin_pending = false;
                Handled
            }
            ContactInput::Begin { at } => {
                context.reject(Rejection::BeginWhileActive {
                    at: *at,
                    started: self.start_time,
                });
                Handled
            }
            ContactInput::End { at } => {
                self.complete_contact(context, *at);
                Transition(State::idle())
            }
        }
    }
}

pub fn classify_contact(
    thresholds: &GestureThresholds,
    duration_ms: f64,
    start: ScreenPoint,
    end: ScreenPoint,
) -> GestureKind {
    let distance = start.distance(end);

    if duration_ms < thresholds.tap_max_ms && distance < thresholds.tap_max_distance_px {
        return GestureKind::Tap;
    }
    if duration_ms >= thresholds.long_press_min_ms && distance < thresholds.tap_max_distance_px {
        return GestureKind::LongPress;
    }
    if distance >= thresholds.swipe_min_distance_px {
        return GestureKind::Swipe(swipe_direction(start, end));
    }

    // Mid-length presses and short drags have no dedicated gesture.
    GestureKind::Tap
}

fn swipe_direction(start: ScreenPoint, end: ScreenPoint) -> SwipeDirection {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    if dx.abs() > dy.abs() {
        if dx > 0.0 {
            SwipeDirection::Right
        } else {
            SwipeDirection::Left
        }
    } else if dy > 0.0 {
        SwipeDirection::Down
    } else {
        SwipeDirection::Up
    }
}
