use thiserror::Error;

/// All errors produced by packline-core.
#[derive(Debug, Error)]
pub enum PacklineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("speech recognition error: {0}")]
    Recognition(String),

    #[error("announcement error: {0}")]
    Announcement(String),

    #[error("a packing session is already active")]
    SessionActive,

    #[error("no packing session is active")]
    SessionNotActive,

    #[error("completion store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PacklineError>;
