use std::io::Cursor;

use super::*;
use crate::types::{GestureKind, ScreenPoint, SwipeDirection};

fn identity() -> Calibration {
    Calibration::new(
        AxisRange {
            max_x: 1080,
            max_y: 2340,
        },
        ScreenSize {
            width: 1080,
            height: 2340,
        },
    )
    .expect("calibration")
}

fn point(x: f64, y: f64) -> ScreenPoint {
    ScreenPoint { x, y }
}

fn stream() -> GestureStream {
    GestureStream::new(identity(), GestureThresholds::default(), Logger::quiet())
}

/// One contact: position report, down, optional move report, up.
fn contact(t0: f64, t1: f64, from: (i64, i64), to: (i64, i64)) -> Vec<RawEvent> {
    let mut events = vec![
        RawEvent::touch_down(t0),
        RawEvent::position_x(t0, from.0),
        RawEvent::position_y(t0, from.1),
        RawEvent::sync(t0),
    ];
    if to != from {
        let mid = (t0 + t1) / 2.0;
        events.push(RawEvent::position_x(mid, to.0));
        events.push(RawEvent::position_y(mid, to.1));
        events.push(RawEvent::sync(mid));
    }
    events.push(RawEvent::touch_up(t1));
    events.push(RawEvent::sync(t1));
    events
}

#[test]
fn concrete_tap_scenario() {
    let events = vec![
        RawEvent::touch_down(0.0),
        RawEvent::position_x(0.0, 500),
        RawEvent::position_y(0.0, 1000),
        RawEvent::touch_up(0.15),
    ];
    let gestures = classify(&events, &identity());
    assert_eq!(gestures.len(), 1);
    let tap = gestures[0];
    assert_eq!(tap.kind, GestureKind::Tap);
    assert_eq!((tap.x, tap.y), (500.0, 1000.0));
    assert!((tap.timestamp - 0.15).abs() < 1e-9);
    assert_eq!(tap.duration_ms, 150);
}

#[test]
fn threshold_boundaries() {
    let tap = classify(&contact(1.0, 1.199, (100, 100), (110, 100)), &identity());
    assert_eq!(tap[0].kind, GestureKind::Tap);

    let press = classify(&contact(1.0, 1.501, (100, 100), (110, 100)), &identity());
    assert_eq!(press[0].kind, GestureKind::LongPress);
    assert_eq!(press[0].duration_ms, 501);

    let swipe = classify(&contact(1.0, 1.3, (100, 1000), (100, 850)), &identity());
    assert_eq!(swipe[0].kind, GestureKind::Swipe(SwipeDirection::Up));
    assert_eq!(swipe[0].start(), point(100.0, 1000.0));
    assert_eq!(swipe[0].end(), point(100.0, 850.0));
}

#[test]
fn swipes_in_each_direction() {
    let cases = [
        ((200, 500), (350, 500), SwipeDirection::Right),
        ((350, 500), (200, 500), SwipeDirection::Left),
        ((500, 500), (500, 650), SwipeDirection::Down),
        ((500, 650), (500, 500), SwipeDirection::Up),
    ];
    for (from, to, direction) in cases {
        let gestures = classify(&contact(0.0, 0.2, from, to), &identity());
        assert_eq!(gestures.len(), 1);
        assert_eq!(gestures[0].direction(), Some(direction), "{from:?} -> {to:?}");
    }
}

#[test]
fn normalization_maps_axis_ends_to_screen_ends() {
    let calibration = Calibration::new(
        AxisRange {
            max_x: 4095,
            max_y: 4095,
        },
        ScreenSize {
            width: 1080,
            height: 2340,
        },
    )
    .expect("calibration");

    assert_eq!(calibration.screen_x(4095), Some(1080.0));
    assert_eq!(calibration.screen_y(4095), Some(2340.0));
    assert_eq!(calibration.screen_x(0), Some(0.0));
    assert_eq!(calibration.screen_x(4096), None);
    assert_eq!(calibration.screen_y(-1), None);
}

#[test]
fn streaming_matches_batch() {
    let mut events = contact(0.0, 0.12, (100, 100), (100, 100));
    events.extend(contact(1.0, 1.7, (300, 300), (310, 300)));
    events.extend(contact(3.0, 3.25, (900, 1200), (300, 1200)));
    events.extend(contact(9.0, 9.05, (50, 2300), (50, 2300)));

    let batch = classify(&events, &identity());

    let mut live = stream();
    let streamed: Vec<Gesture> = events.iter().filter_map(|event| live.push(event)).collect();

    assert_eq!(batch.len(), 4);
    assert_eq!(streamed, batch);
    assert_eq!(
        batch.iter().map(|g| g.kind).collect::<Vec<_>>(),
        vec![
            GestureKind::Tap,
            GestureKind::LongPress,
            GestureKind::Swipe(SwipeDirection::Left),
            GestureKind::Tap,
        ]
    );
}

#[test]
fn position_persists_across_contacts() {
    // The second contact only reports Y; X carries over from the first.
    let mut events = contact(0.0, 0.1, (400, 400), (400, 400));
    events.extend([
        RawEvent::touch_down(1.0),
        RawEvent::position_y(1.0, 800),
        RawEvent::sync(1.0),
        RawEvent::touch_up(1.1),
    ]);
    let gestures = classify(&events, &identity());
    assert_eq!(gestures.len(), 2);
    assert_eq!((gestures[1].x, gestures[1].y), (400.0, 800.0));
    assert_eq!(gestures[1].kind, GestureKind::Tap);
}

#[test]
fn malformed_events_are_skipped_and_counted() {
    let mut live = stream();
    let events = [
        RawEvent::touch_up(0.0),
        RawEvent::touch_down(0.1),
        RawEvent::position_x(0.1, 99_999),
        RawEvent::position_x(0.1, 500),
        RawEvent::position_y(0.1, 500),
        RawEvent::touch_down(0.12),
        RawEvent::new(0.13, EventCode::Touch, 7),
        RawEvent::touch_up(0.2),
    ];
    let gestures: Vec<Gesture> = events.iter().filter_map(|e| live.push(e)).collect();

    assert_eq!(gestures.len(), 1);
    assert_eq!(gestures[0].kind, GestureKind::Tap);
    assert_eq!(live.skipped(), 4);
}

#[test]
fn end_without_any_position_emits_nothing() {
    let mut live = stream();
    assert!(live.push(&RawEvent::touch_down(0.0)).is_none());
    assert!(live.push(&RawEvent::touch_up(0.1)).is_none());
    assert_eq!(live.skipped(), 1);
}

#[test]
fn end_before_begin_is_rejected() {
    let mut live = stream();
    live.push(&RawEvent::position_x(5.0, 10));
    live.push(&RawEvent::position_y(5.0, 10));
    live.push(&RawEvent::touch_down(5.0));
    assert!(live.push(&RawEvent::touch_up(4.0)).is_none());
    assert_eq!(live.skipped(), 1);

    // The machine is idle again and accepts the next contact.
    live.push(&RawEvent::touch_down(6.0));
    assert!(live.push(&RawEvent::touch_up(6.1)).is_some());
}

#[test]
fn open_contact_is_reported_not_emitted() {
    let mut live = stream();
    live.push(&RawEvent::position_x(0.0, 10));
    live.push(&RawEvent::position_y(0.0, 10));
    live.push(&RawEvent::touch_down(0.0));
    let stats = live.finish();
    assert!(stats.open_contact);
    assert_eq!(stats.emitted, 0);
}

#[test]
fn invalid_calibration_fails_before_parsing() {
    let err = Calibration::new(
        AxisRange { max_x: 0, max_y: 10 },
        ScreenSize {
            width: 100,
            height: 100,
        },
    )
    .expect_err("zero axis");
    assert!(matches!(err, Error::InvalidCalibration(_)));

    let mut unprobed = GeteventLog::new(Cursor::new(""), None).expect("log");
    let err = Calibration::probe(
        &mut unprobed,
        ScreenSize {
            width: 100,
            height: 100,
        },
    )
    .expect_err("missing axis range");
    assert!(matches!(err, Error::MissingCalibration { .. }));
    assert!(err.is_configuration());
}

#[test]
fn recorded_log_classifies_end_to_end() {
    let probe = "ABS (0003): ABS_MT_POSITION_X : value 0, min 0, max 1079\n\
                 ABS_MT_POSITION_Y : value 0, min 0, max 2339\n";
    let log = "\
[   10.000000] /dev/input/event2: EV_KEY BTN_TOUCH DOWN
[   10.000000] /dev/input/event2: EV_ABS ABS_MT_POSITION_X 00000200
[   10.000000] /dev/input/event2: EV_ABS ABS_MT_POSITION_Y 00000400
[   10.000000] /dev/input/event2: EV_SYN SYN_REPORT 00000000
[   10.100000] /dev/input/event2: EV_KEY BTN_TOUCH UP
[   10.100000] /dev/input/event2: EV_SYN SYN_REPORT 00000000
";
    let mut source = GeteventLog::new(Cursor::new(log), parse_axis_range(probe)).expect("log");
    let (gestures, stats) = classify_source(
        &mut source,
        ScreenSize {
            width: 1080,
            height: 2340,
        },
        GestureThresholds::default(),
        Logger::quiet(),
    )
    .expect("classify");

    assert_eq!(gestures.len(), 1);
    assert_eq!(gestures[0].kind, GestureKind::Tap);
    assert!((gestures[0].x - 512.0 / 1079.0 * 1080.0).abs() < 1e-6);
    assert_eq!(stats.skipped, 0);
    assert!(!stats.open_contact);
}
