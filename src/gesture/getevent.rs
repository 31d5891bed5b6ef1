use std::io::BufRead;

use regex::Regex;

use super::AxisRange;
use crate::{
    device::EventSource,
    error::Result,
    types::{EventCode, RawEvent},
};

const LINE_PATTERN: &str = concat!(
    r"^\[\s*(?P<ts>\d+(?:\.\d+)?)\]\s+(?:/\S+:\s+)?",
    r"(?P<kind>\S+)\s+(?P<code>\S+)\s+(?P<value>\S+)\s*$",
);

/// Parser for `getevent -t` / `getevent -lt` output lines.
#[derive(Clone, Debug)]
pub struct GeteventParser {
    line: Regex,
}

impl GeteventParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            line: Regex::new(LINE_PATTERN)?,
        })
    }

    /// Returns `None` for headers, blank lines and anything else that is
    /// not a timestamped event.
    pub fn parse_line(&self, line: &str) -> Option<RawEvent> {
        let caps = self.line.captures(line.trim())?;
        let timestamp = caps.name("ts")?.as_str().parse::<f64>().ok()?;
        let code = event_code(caps.name("kind")?.as_str(), caps.name("code")?.as_str());
        let value = event_value(caps.name("value")?.as_str())?;
        Some(RawEvent::new(timestamp, code, value))
    }

    pub fn parse_log(&self, text: &str) -> Vec<RawEvent> {
        text.lines().filter_map(|line| self.parse_line(line)).collect()
    }
}

fn event_code(kind: &str, code: &str) -> EventCode {
    match (kind, code) {
        (_, "ABS_MT_POSITION_X") | ("0003", "0035") => EventCode::PositionX,
        (_, "ABS_MT_POSITION_Y") | ("0003", "0036") => EventCode::PositionY,
        (_, "BTN_TOUCH") | ("0001", "014a") => EventCode::Touch,
        (_, "SYN_REPORT") | ("0000", "0000") => EventCode::SyncReport,
        _ => EventCode::Other(code.to_string()),
    }
}

fn event_value(raw: &str) -> Option<i64> {
    match raw {
        "DOWN" => Some(1),
        "UP" => Some(0),
        hex => i64::from_str_radix(hex, 16).ok(),
    }
}

/// Extracts the X/Y `max` values from `getevent -lp` (or `-p`) output.
/// Only the first device advertising each axis is used.
pub fn parse_axis_range(text: &str) -> Option<AxisRange> {
    let mut max_x = None;
    let mut max_y = None;
    for line in text.lines() {
        let Some((label, max)) = axis_entry(line) else {
            continue;
        };
        match label {
            "ABS_MT_POSITION_X" | "0035" if max_x.is_none() => max_x = Some(max),
            "ABS_MT_POSITION_Y" | "0036" if max_y.is_none() => max_y = Some(max),
            _ => {}
        }
    }
    Some(AxisRange {
        max_x: max_x?,
        max_y: max_y?,
    })
}

/// Splits `[ABS (0003):] LABEL : value 0, min 0, max 1079, ...` into the
/// label and its max.
fn axis_entry(line: &str) -> Option<(&str, i64)> {
    let mut parts = line.rsplit(':');
    let attrs = parts.next()?;
    let label = parts.next()?.trim();
    let rest = &attrs[attrs.find("max ")? + 4..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some((label, digits.parse().ok()?))
}

/// Event source over recorded or live getevent output.
pub struct GeteventLog<R> {
    reader: R,
    parser: GeteventParser,
    axis: Option<AxisRange>,
    buf: String,
    unparsed: u64,
}

impl<R: BufRead> GeteventLog<R> {
    pub fn new(reader: R, axis: Option<AxisRange>) -> Result<Self> {
        Ok(Self {
            reader,
            parser: GeteventParser::new()?,
            axis,
            buf: String::new(),
            unparsed: 0,
        })
    }

    /// Non-empty lines that were not events (device headers and the like).
    pub fn unparsed_lines(&self) -> u64 {
        self.unparsed
    }
}

impl<R: BufRead> EventSource for GeteventLog<R> {
    fn axis_range(&mut self) -> anyhow::Result<Option<AxisRange>> {
        Ok(self.axis)
    }

    fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            if let Some(event) = self.parser.parse_line(&self.buf) {
                return Ok(Some(event));
            }
            if !self.buf.trim().is_empty() {
                self.unparsed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const PROBE: &str = "\
add device 1: /dev/input/event2
  name:     \"touchscreen\"
  events:
    KEY (0001): BTN_TOUCH
    ABS (0003): ABS_MT_SLOT           : value 0, min 0, max 9, fuzz 0, flat 0, resolution 0
                ABS_MT_POSITION_X     : value 0, min 0, max 1079, fuzz 0, flat 0, resolution 0
                ABS_MT_POSITION_Y     : value 0, min 0, max 2339, fuzz 0, flat 0, resolution 0
";

    #[test]
    fn parses_labelled_lines() {
        let parser = GeteventParser::new().expect("parser");
        let line = "[   12.345678] /dev/input/event2: EV_ABS       ABS_MT_POSITION_X    000001f4";
        let event = parser.parse_line(line).expect("event");
        assert_eq!(event.code, EventCode::PositionX);
        assert_eq!(event.value, 500);
        assert!((event.timestamp - 12.345678).abs() < 1e-9);

        let down = parser
            .parse_line("[   12.300000] /dev/input/event2: EV_KEY       BTN_TOUCH            DOWN")
            .expect("down");
        assert_eq!((down.code, down.value), (EventCode::Touch, 1));

        let sync = parser
            .parse_line("[   12.300001] EV_SYN       SYN_REPORT           00000000")
            .expect("sync without device prefix");
        assert_eq!(sync.code, EventCode::SyncReport);
    }

    #[test]
    fn parses_numeric_lines_and_keeps_unknown_codes() {
        let parser = GeteventParser::new().expect("parser");
        let y = parser
            .parse_line("[    1.000000] /dev/input/event2: 0003 0036 000003e8")
            .expect("numeric y");
        assert_eq!((y.code, y.value), (EventCode::PositionY, 1000));

        let tracking = parser
            .parse_line("[    1.000000] /dev/input/event2: EV_ABS ABS_MT_TRACKING_ID ffffffff")
            .expect("tracking id");
        assert_eq!(tracking.code, EventCode::Other("ABS_MT_TRACKING_ID".into()));
    }

    #[test]
    fn rejects_non_event_lines() {
        let parser = GeteventParser::new().expect("parser");
        assert!(parser.parse_line("add device 1: /dev/input/event2").is_none());
        assert!(parser.parse_line("").is_none());
        assert!(parser
            .parse_line("[ 1.0] /dev/input/event2: EV_ABS ABS_MT_POSITION_X zz")
            .is_none());
    }

    #[test]
    fn axis_probe_reads_position_maxima() {
        assert_eq!(
            parse_axis_range(PROBE),
            Some(AxisRange {
                max_x: 1079,
                max_y: 2339
            })
        );
        assert_eq!(parse_axis_range("add device 1: /dev/input/event0\n"), None);
    }

    #[test]
    fn log_source_skips_headers() {
        let text = "\
add device 1: /dev/input/event2
[    0.100000] /dev/input/event2: EV_KEY BTN_TOUCH DOWN
[    0.150000] /dev/input/event2: EV_KEY BTN_TOUCH UP
";
        let mut log = GeteventLog::new(Cursor::new(text), parse_axis_range(PROBE)).expect("log");
        assert!(log.axis_range().expect("axis").is_some());

        let mut events = Vec::new();
        while let Some(event) = log.next_event().expect("next") {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(log.unparsed_lines(), 1);
    }
}
