use thiserror::Error;

pub type Result<T, E = PoseError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("pose engine error: {0}")]
    Engine(String),
}
