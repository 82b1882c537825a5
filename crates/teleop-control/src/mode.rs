//! Input mode state machine.
//!
//! Teleop: the pose pipeline drives the dispatcher. Manual: pose inference is
//! skipped and a keepalive re-submits the operator's angles periodically.
//! Exactly one producer is admitted at a time, and admission is checked when an
//! intent is submitted, never when a producer was registered.

use crate::rate::min_gap_for_hz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Teleop,
    Manual,
}

impl Mode {
    pub fn admits(self, producer: Producer) -> bool {
        matches!(
            (self, producer),
            (Mode::Teleop, Producer::Pose) | (Mode::Manual, Producer::Manual)
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Teleop => f.write_str("teleop"),
            Mode::Manual => f.write_str("manual"),
        }
    }
}

impl core::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teleop" | "pose" => Ok(Mode::Teleop),
            "manual" => Ok(Mode::Manual),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Sources of angle intents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Producer {
    Pose,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
}

pub struct ModeMachine {
    mode: Mode,
    keepalive_period: Duration,
    next_keepalive: Option<Instant>,
    switches: u64,
}

impl ModeMachine {
    pub fn new(initial: Mode, keepalive_hz: f64, now: Instant) -> Self {
        let mut machine = Self {
            mode: initial,
            keepalive_period: min_gap_for_hz(keepalive_hz),
            next_keepalive: None,
            switches: 0,
        };
        if initial == Mode::Manual {
            machine.next_keepalive = Some(now + machine.keepalive_period);
        }
        machine
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn admits(&self, producer: Producer) -> bool {
        self.mode.admits(producer)
    }

    /// Pose inference runs only while teleoperating; capture keeps going regardless.
    pub fn pose_inference_enabled(&self) -> bool {
        self.mode == Mode::Teleop
    }

    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn keepalive_period(&self) -> Duration {
        self.keepalive_period
    }

    pub fn keepalive_deadline(&self) -> Option<Instant> {
        self.next_keepalive
    }

    /// Switch modes. Returns `None` when already in `to`.
    pub fn switch(&mut self, to: Mode, now: Instant) -> Option<Transition> {
        if self.mode == to {
            return None;
        }
        let from = self.mode;
        self.mode = to;
        self.switches += 1;
        self.next_keepalive = match to {
            Mode::Manual => Some(now + self.keepalive_period),
            Mode::Teleop => None,
        };
        Some(Transition { from, to })
    }

    /// True when the keepalive is due; the next deadline is advanced by one
    /// period, skipping ticks that were missed entirely.
    pub fn keepalive_due(&mut self, now: Instant) -> bool {
        match self.next_keepalive {
            Some(at) if self.mode == Mode::Manual && at <= now => {
                let mut next = at + self.keepalive_period;
                if next <= now {
                    next = now + self.keepalive_period;
                }
                self.next_keepalive = Some(next);
                true
            }
            _ => false,
        }
    }

    pub fn set_keepalive_rate_hz(&mut self, hz: f64, now: Instant) {
        self.keepalive_period = min_gap_for_hz(hz);
        if self.next_keepalive.is_some() {
            self.next_keepalive = Some(now + self.keepalive_period);
        }
    }

    /// Tear down the keepalive without changing mode.
    pub fn stop(&mut self) {
        self.next_keepalive = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission() {
        assert!(Mode::Teleop.admits(Producer::Pose));
        assert!(!Mode::Teleop.admits(Producer::Manual));
        assert!(Mode::Manual.admits(Producer::Manual));
        assert!(!Mode::Manual.admits(Producer::Pose));
    }

    #[test]
    fn test_switch_starts_and_stops_keepalive() {
        let t0 = Instant::now();
        let mut m = ModeMachine::new(Mode::Teleop, 10.0, t0);
        assert!(m.pose_inference_enabled());
        assert!(m.keepalive_deadline().is_none());

        let tr = m.switch(Mode::Manual, t0).unwrap();
        assert_eq!(tr, Transition { from: Mode::Teleop, to: Mode::Manual });
        assert!(!m.pose_inference_enabled());
        assert_eq!(m.keepalive_deadline(), Some(t0 + Duration::from_millis(100)));
        assert!(m.switch(Mode::Manual, t0).is_none());

        m.switch(Mode::Teleop, t0);
        assert!(m.keepalive_deadline().is_none());
        assert!(!m.keepalive_due(t0 + Duration::from_secs(5)));
        assert_eq!(m.switches(), 2);
    }

    #[test]
    fn test_keepalive_cadence() {
        let t0 = Instant::now();
        let mut m = ModeMachine::new(Mode::Manual, 80.0, t0);
        assert_eq!(m.keepalive_period(), Duration::from_millis(20));
        assert!(!m.keepalive_due(t0 + Duration::from_millis(19)));
        assert!(m.keepalive_due(t0 + Duration::from_millis(20)));
        assert_eq!(m.keepalive_deadline(), Some(t0 + Duration::from_millis(40)));

        // A long stall does not produce a burst of catch-up ticks.
        assert!(m.keepalive_due(t0 + Duration::from_millis(500)));
        assert_eq!(m.keepalive_deadline(), Some(t0 + Duration::from_millis(520)));
        assert!(!m.keepalive_due(t0 + Duration::from_millis(510)));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Manual".parse::<Mode>().unwrap(), Mode::Manual);
        assert!("auto".parse::<Mode>().is_err());
    }
}
