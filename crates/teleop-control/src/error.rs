use thiserror::Error;

pub type Result<T, E = ControlError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("control loop has stopped")]
    Stopped,
    #[error("metrics error: {0}")]
    Metrics(String),
    #[error(transparent)]
    Link(#[from] hand_link::LinkError),
    #[error(transparent)]
    Pose(#[from] hand_pose::PoseError),
}
