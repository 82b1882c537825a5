use crate::{ControlError, Mode, Result};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

/// Counters updated by the dispatcher as it works.
#[derive(Clone)]
pub struct DispatchCounters {
    pub commands_sent: IntCounter,
    pub intents_coalesced: IntCounter,
    pub sends_dropped: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dispatch: DispatchCounters,
    pub telemetry_received: IntCounter,
    pub telemetry_rate_hz: Gauge,
    pub mode: IntGauge,
}

fn init_err(e: prometheus::Error) -> ControlError {
    ControlError::Metrics(format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let commands_sent = IntCounter::new("hand_commands_sent", "Angle commands written to the link")
            .map_err(init_err)?;
        let intents_coalesced = IntCounter::new(
            "hand_intents_coalesced",
            "Pending angle intents replaced by a newer one before sending",
        )
        .map_err(init_err)?;
        let sends_dropped = IntCounter::new(
            "hand_sends_dropped",
            "Angle commands discarded because the link was not open",
        )
        .map_err(init_err)?;
        let telemetry_received =
            IntCounter::new("hand_telemetry_received", "Telemetry records received")
                .map_err(init_err)?;
        let telemetry_rate_hz =
            Gauge::new("hand_telemetry_rate_hz", "Estimated telemetry arrival rate")
                .map_err(init_err)?;
        let mode = IntGauge::new("hand_control_mode", "Active input mode (0 teleop, 1 manual)")
            .map_err(init_err)?;

        let dispatch = DispatchCounters {
            commands_sent,
            intents_coalesced,
            sends_dropped,
        };
        let _ = registry.register(Box::new(dispatch.commands_sent.clone()));
        let _ = registry.register(Box::new(dispatch.intents_coalesced.clone()));
        let _ = registry.register(Box::new(dispatch.sends_dropped.clone()));
        let _ = registry.register(Box::new(telemetry_received.clone()));
        let _ = registry.register(Box::new(telemetry_rate_hz.clone()));
        let _ = registry.register(Box::new(mode.clone()));

        Ok(Self {
            registry,
            dispatch,
            telemetry_received,
            telemetry_rate_hz,
            mode,
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.set(match mode {
            Mode::Teleop => 0,
            Mode::Manual => 1,
        });
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
