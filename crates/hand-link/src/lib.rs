//! hand-link: wire protocol and channel abstractions for hand teleoperation
//!
//! This crate defines the typed joint-angle values exchanged with a remote hand,
//! the JSON records carried on the duplex link, and a `DuplexChannel` trait with
//! feature-gated backends. The default build enables an in-process `mock`
//! backend and a newline-delimited JSON `tcp` backend.

mod types;
pub use types::{Angle, Joint, JointAngles, ANGLE_MAX, JOINT_COUNT, NEUTRAL_ANGLE};

mod messages;
pub use messages::{decode_inbound, Ack, Command, Inbound, Outbound, TelemetryPayload};

mod error;
pub use error::{LinkError, Result};

mod traits;
pub use traits::{DuplexChannel, EventSink, LinkEvent, LinkState};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockChannel, MockRemote, SentRecord};

#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "tcp")]
pub use tcp::TcpChannel;
