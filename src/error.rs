use crate::audio::AudioError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CastError>;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("protocol error: {0}")]
    Protocol(#[from] cast_protocol::ProtocolError),

    #[error("incompatible stream parameters: {0}")]
    ProtocolMismatch(String),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
