use crate::session::SessionState;

/// Failures of the local audio devices.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No {0} audio device available")]
    NoDevice(&'static str),
    #[error("Unsupported device configuration: {0}")]
    UnsupportedConfig(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Resampler error: {0}")]
    Resampler(String),
    #[error("Audio device thread stopped unexpectedly")]
    DeviceThread,
}

/// Failures surfaced by the session controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {operation} while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error(transparent)]
    Device(#[from] AudioError),
    #[error("{0}")]
    Connection(String),
}
