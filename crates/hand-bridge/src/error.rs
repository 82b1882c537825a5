use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("actuator error: {0}")]
    Actuator(String),

    #[error("actuator not connected")]
    NotConnected,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(e: tokio::task::JoinError) -> Self {
        BridgeError::Join(e.to_string())
    }
}

pub type Result<T, E = BridgeError> = core::result::Result<T, E>;
