use crate::{ControlError, Mode, Result};
use anyhow::Context;
use hand_link::Angle;
use hand_pose::{CurlThresholds, HandSide};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const MIN_FRAME_HZ: f64 = 1.0;
pub const MAX_FRAME_HZ: f64 = 1000.0;

/// Operator-side settings. Every field has a default, so a partial YAML file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    /// Only hands carrying this label drive the actuator.
    pub target_side: HandSide,
    pub initial_mode: Mode,
    /// Angle command rate, clamped to 1..50 Hz.
    pub send_hz: f64,
    /// Manual-mode keepalive rate, clamped to 1..50 Hz.
    pub keepalive_hz: f64,
    pub smoothing_alpha: f64,
    pub curl_low: f64,
    pub curl_high: f64,
    /// Finger speed sent on connect, 0..1000.
    pub speed: Angle,
    /// Telemetry rate requested from the bridge on connect.
    pub telemetry_rate_hz: f64,
    /// Camera frame rate used to poll the pose source, 1..=1000 Hz.
    pub frame_hz: f64,
    pub status_trail_len: usize,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            target_side: HandSide::Right,
            initial_mode: Mode::Teleop,
            send_hz: 10.0,
            keepalive_hz: 10.0,
            smoothing_alpha: 0.5,
            curl_low: 0.15,
            curl_high: 0.5,
            speed: Angle::new(600),
            telemetry_rate_hz: 5.0,
            frame_hz: 30.0,
            status_trail_len: 50,
        }
    }
}

impl TeleopConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ControlError::InvalidConfig(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            )));
        }
        self.curl_thresholds()?;
        if !(MIN_FRAME_HZ..=MAX_FRAME_HZ).contains(&self.frame_hz) {
            return Err(ControlError::InvalidConfig(format!(
                "frame_hz must be in {MIN_FRAME_HZ}..={MAX_FRAME_HZ}, got {}",
                self.frame_hz
            )));
        }
        if !(self.telemetry_rate_hz.is_finite() && self.telemetry_rate_hz > 0.0) {
            return Err(ControlError::InvalidConfig(format!(
                "telemetry_rate_hz must be positive, got {}",
                self.telemetry_rate_hz
            )));
        }
        if self.status_trail_len == 0 {
            return Err(ControlError::InvalidConfig(
                "status_trail_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Pose polling period, never shorter than 1 ms.
    pub fn frame_period(&self) -> Duration {
        let hz = if self.frame_hz.is_finite() {
            self.frame_hz.clamp(MIN_FRAME_HZ, MAX_FRAME_HZ)
        } else {
            MIN_FRAME_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }

    pub fn curl_thresholds(&self) -> Result<CurlThresholds> {
        CurlThresholds::new(self.curl_low, self.curl_high)
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<TeleopConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: TeleopConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating config: {}", path.display()))?;
    Ok(config)
}
