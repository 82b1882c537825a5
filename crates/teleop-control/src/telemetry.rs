use hand_link::{Angle, JointAngles, TelemetryPayload, JOINT_COUNT};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

/// Cadence at which the arrival rate is recomputed.
pub const RATE_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Latest telemetry values for display.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySample {
    pub forces: [f64; JOINT_COUNT],
    pub temps: [f64; JOINT_COUNT],
    pub status: [i64; JOINT_COUNT],
    pub angles: Option<JointAngles>,
    pub speed: Option<Angle>,
    /// Sender clock, seconds since the epoch.
    pub server_time: Option<f64>,
    pub received_at: Option<OffsetDateTime>,
}

fn merge<T: Copy>(dst: &mut [T; JOINT_COUNT], src: &Option<Vec<T>>) {
    if let Some(values) = src {
        for (slot, v) in dst.iter_mut().zip(values) {
            *slot = *v;
        }
    }
}

/// Tracks the last telemetry arrival and estimates the arrival rate from it.
#[derive(Debug, Default)]
pub struct TelemetryMonitor {
    sample: TelemetrySample,
    last_arrival: Option<Instant>,
    rate_hz: f64,
    received: u64,
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge present fields into the displayed sample and note the arrival time.
    pub fn record(&mut self, payload: &TelemetryPayload, now: Instant) {
        merge(&mut self.sample.forces, &payload.forces);
        merge(&mut self.sample.temps, &payload.temps);
        merge(&mut self.sample.status, &payload.status);
        if payload.angles.is_some() {
            self.sample.angles = payload.angles;
        }
        if payload.speed.is_some() {
            self.sample.speed = payload.speed;
        }
        if payload.t.is_some() {
            self.sample.server_time = payload.t;
        }
        self.sample.received_at = Some(OffsetDateTime::now_utc());
        self.last_arrival = Some(now);
        self.received += 1;
    }

    /// Recompute the rate as `1000 / ms since the last arrival`; zero if nothing
    /// ever arrived. Gaps under a millisecond count as one millisecond.
    pub fn sample_rate(&mut self, now: Instant) -> f64 {
        self.rate_hz = match self.last_arrival {
            None => 0.0,
            Some(at) => {
                let ms = now.saturating_duration_since(at).as_secs_f64() * 1000.0;
                1000.0 / ms.max(1.0)
            }
        };
        self.rate_hz
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    pub fn sample(&self) -> &TelemetrySample {
        &self.sample
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_is_zero_before_first_message() {
        let mut m = TelemetryMonitor::new();
        assert_eq!(m.sample_rate(Instant::now()), 0.0);
    }

    #[test]
    fn test_rate_from_last_gap() {
        let t0 = Instant::now();
        let mut m = TelemetryMonitor::new();
        m.record(&TelemetryPayload::default(), t0);
        let rate = m.sample_rate(t0 + Duration::from_millis(200));
        assert!((rate - 5.0).abs() < 1e-9);
        assert_eq!(m.sample_rate(t0), 1000.0);
    }

    #[test]
    fn test_absent_fields_keep_previous_values() {
        let t0 = Instant::now();
        let mut m = TelemetryMonitor::new();
        m.record(
            &TelemetryPayload {
                forces: Some(vec![1.0; 6]),
                temps: Some(vec![30.0; 6]),
                status: Some(vec![2; 6]),
                ..Default::default()
            },
            t0,
        );
        m.record(
            &TelemetryPayload {
                forces: Some(vec![5.0; 6]),
                ..Default::default()
            },
            t0 + Duration::from_millis(100),
        );
        let s = m.sample();
        assert_eq!(s.forces, [5.0; 6]);
        assert_eq!(s.temps, [30.0; 6]);
        assert_eq!(s.status, [2; 6]);
        assert!(s.received_at.is_some());
        assert_eq!(m.received(), 2);
    }

    #[test]
    fn test_short_arrays_update_prefix() {
        let mut m = TelemetryMonitor::new();
        m.record(
            &TelemetryPayload {
                temps: Some(vec![40.0, 41.0]),
                ..Default::default()
            },
            Instant::now(),
        );
        assert_eq!(m.sample().temps, [40.0, 41.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
