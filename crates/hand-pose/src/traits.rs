use crate::{Observation, Result};

/// Capability interface over an external pose-estimation engine.
pub trait PoseSource: Send {
    /// Run one inference step on the most recent camera frame.
    ///
    /// `Ok(None)` means nothing was detected this cycle.
    fn next_observation(&mut self) -> Result<Option<Observation>>;
}
