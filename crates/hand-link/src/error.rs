use thiserror::Error;

pub type Result<T, E = LinkError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel is not open")]
    NotOpen,
    #[error("channel already opened")]
    AlreadyOpened,
    #[error("encode error: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Encode(e.to_string())
    }
}
