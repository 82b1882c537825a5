use crate::{BridgeError, Result};
use anyhow::Context;
use hand_link::Angle;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub listen: String,
    /// Driver tick; one batched angle write per tick at most.
    pub driver_period_ms: u64,
    pub initial_speed: Angle,
    pub initial_force: Angle,
    pub telemetry_hz: f64,
    /// Telemetry records buffered per session before it counts as too slow.
    pub telemetry_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            driver_period_ms: 100,
            initial_speed: Angle::new(600),
            initial_force: Angle::new(500),
            telemetry_hz: 5.0,
            telemetry_buffer: 16,
        }
    }
}

impl BridgeConfig {
    pub fn driver_period(&self) -> Duration {
        Duration::from_millis(self.driver_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver_period_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "driver_period_ms must be at least 1".to_string(),
            ));
        }
        if self.telemetry_buffer == 0 {
            return Err(BridgeError::InvalidConfig(
                "telemetry_buffer must be at least 1".to_string(),
            ));
        }
        if !self.telemetry_hz.is_finite() {
            return Err(BridgeError::InvalidConfig(format!(
                "telemetry_hz must be finite, got {}",
                self.telemetry_hz
            )));
        }
        Ok(())
    }
}

pub fn load_bridge_config(path: impl AsRef<Path>) -> anyhow::Result<BridgeConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: BridgeConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating config: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_bridge_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen: 127.0.0.1:9000\ndriver_period_ms: 50").unwrap();
        let config = load_bridge_config(file.path()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.driver_period(), Duration::from_millis(50));
        assert_eq!(config.initial_force.get(), 500);

        let bad = BridgeConfig {
            driver_period_ms: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
