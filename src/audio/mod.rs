pub mod capture;
pub mod device;
pub mod playback;

pub use capture::{CaptureSource, ChannelCapture, CpalCapture};
pub use playback::{CollectingSink, CpalPlayback, PlaybackSink};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::DeviceNameError> for AudioError {
    fn from(err: cpal::DeviceNameError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Device(err.to_string())
    }
}
