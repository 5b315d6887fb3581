//! Error types for the turn-taking core

use shared::FormatError;
use thiserror::Error;

pub type TurnResult<T> = Result<T, TurnError>;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed audio: {0}")]
    Format(#[from] FormatError),

    #[error("Monitor thread error: {0}")]
    Monitor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for TurnError {
    fn from(err: cpal::DevicesError) -> Self {
        TurnError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DeviceNameError> for TurnError {
    fn from(err: cpal::DeviceNameError) -> Self {
        TurnError::AudioDevice(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for TurnError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        TurnError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for TurnError {
    fn from(err: cpal::BuildStreamError) -> Self {
        TurnError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for TurnError {
    fn from(err: cpal::PlayStreamError) -> Self {
        TurnError::AudioStream(err.to_string())
    }
}
