//! hand-pose: hand landmarks to joint-angle targets
//!
//! The pose-estimation engine itself lives outside this workspace; it is
//! reached through the `PoseSource` trait. This crate turns each observation
//! into a six-joint target (`curl`) and damps frame-to-frame jitter
//! (`smoothing`).

mod types;
pub use types::{landmarks, Finger, Hand, HandSide, Landmark, Observation, LANDMARK_COUNT};

mod error;
pub use error::{PoseError, Result};

mod traits;
pub use traits::PoseSource;

pub mod curl;
pub use curl::{select_hand, CurlEstimator, CurlThresholds};

pub mod smoothing;
pub use smoothing::EmaSmoother;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{synthetic_hand, MockPoseSource, ScriptedPoseSource};

/// Parse an observation from the JSON shape emitted by landmark exporters.
pub fn observation_from_json(text: &str) -> Result<Observation> {
    serde_json::from_str(text).map_err(|e| PoseError::Decode(e.to_string()))
}
