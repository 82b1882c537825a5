//! teleop-control: the operator-side control loop
//!
//! This crate owns everything between a pose estimate (or an operator edit)
//! and the wire:
//! - a coalescing dispatcher that bounds the command rate and always sends the
//!   newest target
//! - the Teleop/Manual mode machine and its keepalive
//! - telemetry arrival-rate estimation and a connection status trail
//! - `ControlLoop`, a single task that owns all of the above plus the channel

mod error;
pub use error::{ControlError, Result};

pub mod rate;
pub use rate::{clamp_rate_hz, min_gap_for_hz};

pub mod dispatcher;
pub use dispatcher::{DispatchStats, Dispatcher, StepOutcome, TimerToken};

pub mod mode;
pub use mode::{Mode, ModeMachine, Producer, Transition};

mod telemetry;
pub use telemetry::{TelemetryMonitor, TelemetrySample, RATE_SAMPLE_PERIOD};

mod status;
pub use status::{StatusEntry, StatusTrail};

mod config;
pub use config::{load_config_file, TeleopConfig};

mod metrics;
pub use metrics::{DispatchCounters, MetricsHub};

pub mod control;
pub use control::{
    ControlContext, ControlEvent, ControlHandle, ControlLoop, ControlReport, ControlSnapshot,
    DirectCommand,
};
