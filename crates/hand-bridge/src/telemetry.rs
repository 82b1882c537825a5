use crate::actuator::with_actuator;
use crate::{BridgeState, Result};
use hand_link::{Inbound, TelemetryPayload};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub const MIN_TELEMETRY_HZ: f64 = 0.5;
pub const MAX_TELEMETRY_HZ: f64 = 50.0;
pub const DEFAULT_TELEMETRY_HZ: f64 = 5.0;

/// Clamp a requested push rate; non-finite requests fall back to the default.
pub fn clamp_telemetry_hz(hz: f64) -> f64 {
    if !hz.is_finite() {
        return DEFAULT_TELEMETRY_HZ;
    }
    hz.clamp(MIN_TELEMETRY_HZ, MAX_TELEMETRY_HZ)
}

/// Periodically reads the actuator and broadcasts a telemetry record to every session.
pub struct TelemetryPusher {
    state: Arc<BridgeState>,
}

impl TelemetryPusher {
    pub fn new(state: Arc<BridgeState>) -> Self {
        Self { state }
    }

    /// Read and broadcast once. Returns `false` when skipped because nobody
    /// is listening or the hand is offline.
    pub async fn push_once(&self) -> Result<bool> {
        if self.state.subscribers() == 0 || !self.state.actuator_connected() {
            return Ok(false);
        }
        let reading = with_actuator(&self.state.actuator, |hand| hand.read_telemetry()).await?;
        let now = OffsetDateTime::now_utc();
        let payload = TelemetryPayload {
            t: Some(now.unix_timestamp_nanos() as f64 / 1e9),
            forces: Some(reading.forces),
            temps: Some(reading.temps),
            status: Some(reading.status),
            angles: Some(reading.angles),
            speed: Some(self.state.speed()),
        };
        let text = serde_json::to_string(&Inbound::Telemetry { telemetry: payload })?;
        let delivered = self.state.broadcast(text);
        debug!("telemetry pushed to {delivered} sessions");
        Ok(true)
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.state.telemetry_period()).await;
            if let Err(e) = self.push_once().await {
                warn!("telemetry read failed: {e}");
            }
        }
    }
}
