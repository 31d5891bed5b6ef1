use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_BUFFER_INTERVAL_MS: &str = "UIVERIFY_BUFFER_INTERVAL_MS";
pub const ENV_BUFFER_MAX_FRAMES: &str = "UIVERIFY_BUFFER_MAX_FRAMES";
pub const ENV_VERIFY_RECENCY_MS: &str = "UIVERIFY_VERIFY_RECENCY_MS";
pub const ENV_CHANGE_THRESHOLD: &str = "UIVERIFY_CHANGE_THRESHOLD";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gesture: GestureThresholds,
    pub buffer: BufferConfig,
    pub verify: VerifyConfig,
    pub change: ChangeConfig,
    pub checkpoint: CheckpointConfig,
    pub typing: TypingConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureThresholds {
    pub tap_max_ms: f64,
    pub long_press_min_ms: f64,
    pub tap_max_distance_px: f64,
    pub swipe_min_distance_px: f64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            tap_max_ms: 200.0,
            long_press_min_ms: 500.0,
            tap_max_distance_px: 50.0,
            swipe_min_distance_px: 100.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub interval_ms: u64,
    pub max_frames: usize,
    pub degraded_after_failures: u32,
    pub capture_timeout_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            interval_ms: 150,
            max_frames: 200,
            degraded_after_failures: 5,
            capture_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub recency_window_ms: u64,
    pub fallback_timeout_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            recency_window_ms: 500,
            fallback_timeout_ms: 3_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    /// Hamming distance (out of 64) above which two frames count as changed.
    pub threshold: u32,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub screen_change_weight: u32,
    pub long_wait_weight: u32,
    pub navigation_weight: u32,
    pub long_wait_secs: f64,
    pub top_k: usize,
    pub min_spacing: usize,
    pub back_zone_x_pct: f64,
    pub back_zone_y_pct: f64,
    pub bottom_strip_y_pct: f64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            screen_change_weight: 50,
            long_wait_weight: 20,
            navigation_weight: 15,
            long_wait_secs: 5.0,
            top_k: 8,
            min_spacing: 3,
            back_zone_x_pct: 15.0,
            back_zone_y_pct: 10.0,
            bottom_strip_y_pct: 85.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Taps below this share of the screen height count as key presses.
    pub keyboard_top_pct: f64,
    pub max_gap_secs: f64,
    pub min_taps: usize,
    pub min_x_spread_px: f64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            keyboard_top_pct: 60.0,
            max_gap_secs: 1.0,
            min_taps: 3,
            min_x_spread_px: 50.0,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|source| Error::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_config(path)?;
        Self::from_toml_str(&raw, path)
    }

    /// Defaults, then the project file, then the test file; later layers
    /// override individual keys of earlier ones. Environment overrides are
    /// applied last.
    pub fn load_layered(project: Option<&Path>, test: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Value::try_from(Config::default())
            .map_err(|err| Error::InvalidConfig(format!("default config: {err}")))?;

        for path in [project, test].into_iter().flatten() {
            let raw = read_config(path)?;
            let overlay: toml::Table = toml::from_str(&raw).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
            merge_values(&mut merged, toml::Value::Table(overlay));
        }

        let mut config: Config = merged
            .try_into()
            .map_err(|err| Error::InvalidConfig(format!("merged config: {err}")))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.buffer.interval_ms = parse_env_u64(ENV_BUFFER_INTERVAL_MS, self.buffer.interval_ms)?;
        self.buffer.max_frames =
            parse_env_u64(ENV_BUFFER_MAX_FRAMES, self.buffer.max_frames as u64)? as usize;
        self.verify.recency_window_ms =
            parse_env_u64(ENV_VERIFY_RECENCY_MS, self.verify.recency_window_ms)?;
        self.change.threshold = parse_env_u32(ENV_CHANGE_THRESHOLD, self.change.threshold)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.gesture;
        if g.tap_max_ms <= 0.0 || g.tap_max_ms > g.long_press_min_ms {
            return Err(Error::InvalidConfig(format!(
                "gesture.tap_max_ms ({}) must be in (0, long_press_min_ms = {}]",
                g.tap_max_ms, g.long_press_min_ms
            )));
        }
        if g.tap_max_distance_px <= 0.0 || g.tap_max_distance_px > g.swipe_min_distance_px {
            return Err(Error::InvalidConfig(format!(
                "gesture.tap_max_distance_px ({}) must be in (0, swipe_min_distance_px = {}]",
                g.tap_max_distance_px, g.swipe_min_distance_px
            )));
        }
        if self.buffer.interval_ms == 0 {
            return Err(Error::InvalidConfig("buffer.interval_ms must be > 0".into()));
        }
        if self.buffer.max_frames == 0 {
            return Err(Error::InvalidConfig("buffer.max_frames must be > 0".into()));
        }
        if self.buffer.degraded_after_failures == 0 {
            return Err(Error::InvalidConfig(
                "buffer.degraded_after_failures must be > 0".into(),
            ));
        }
        if self.buffer.capture_timeout_ms == 0 || self.verify.fallback_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "capture timeouts must be > 0 (an unbounded wait is not allowed)".into(),
            ));
        }
        if self.change.threshold > 64 {
            return Err(Error::InvalidConfig(format!(
                "change.threshold ({}) exceeds the 64-bit hash width",
                self.change.threshold
            )));
        }
        if self.checkpoint.top_k == 0 {
            return Err(Error::InvalidConfig("checkpoint.top_k must be > 0".into()));
        }
        if !(0.0..100.0).contains(&self.typing.keyboard_top_pct) {
            return Err(Error::InvalidConfig(format!(
                "typing.keyboard_top_pct ({}) must be within [0, 100)",
                self.typing.keyboard_top_pct
            )));
        }
        if self.typing.min_taps < 2 {
            return Err(Error::InvalidConfig("typing.min_taps must be >= 2".into()));
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

pub fn parse_env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidConfig(format!("{name} must be an unsigned integer"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(Error::InvalidConfig(format!("{name} invalid: {err}"))),
    }
}

pub fn parse_env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::InvalidConfig(format!("{name} must be an unsigned integer"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(Error::InvalidConfig(format!("{name} invalid: {err}"))),
    }
}

pub fn parse_env_bool01(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(Error::InvalidConfig(format!("{name} must be 0 or 1"))),
        },
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(Error::InvalidConfig(format!("{name} invalid: {err}"))),
    }
}
