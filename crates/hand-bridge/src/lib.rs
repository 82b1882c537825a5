//! hand-bridge: the actuator side of the teleoperation link
//!
//! A bridge owns one physical (or simulated) hand behind the blocking
//! `HandActuator` trait. Operators connect over TCP and exchange the same
//! JSON-lines records the control loop speaks. Angle targets never touch the
//! actuator from a session: they land in a latest-only mailbox and a single
//! driver task writes them at a fixed cadence. A second task pushes telemetry
//! to every connected session.

mod error;
pub use error::{BridgeError, Result};

mod actuator;
pub use actuator::{shared, ActuatorReading, HandActuator, SharedActuator};

mod mailbox;
pub use mailbox::LatestOnly;

mod config;
pub use config::{load_bridge_config, BridgeConfig};

pub mod driver;
pub use driver::Driver;

pub mod telemetry;
pub use telemetry::{clamp_telemetry_hz, TelemetryPusher};

pub mod session;
pub use session::{handle_record, BridgeState};

mod server;
pub use server::HandBridge;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockHand, MockHandProbe};
