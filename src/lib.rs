pub mod audio;
pub mod config;
pub mod context;
pub mod llm;
pub mod pipeline;
pub mod speech;
pub mod vts;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AituberError {
    #[error("Dialogue backend unavailable: {0}")]
    DialogueUnavailable(String),

    #[error("Speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Animation sink unavailable: {0}")]
    AnimationSinkUnavailable(String),

    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for AituberError {
    fn from(e: std::io::Error) -> Self {
        AituberError::IOError(e.to_string())
    }
}

impl AituberError {
    /// Whether a turn in progress must be abandoned when this error occurs.
    ///
    /// Dialogue and synthesis failures abort the current turn and return the
    /// machine to idle. Animation sink failures never do: the character
    /// freezes but audio keeps playing.
    pub fn aborts_turn(&self) -> bool {
        match self {
            AituberError::DialogueUnavailable(_) => true,
            AituberError::SynthesisUnavailable(_) => true,
            AituberError::AnimationSinkUnavailable(_) => false,
            AituberError::TranscriptionError(_) => false,
            AituberError::AudioDeviceError(_) => true,
            AituberError::AudioProcessingError(_) => false,
            AituberError::IOError(_) => true,
            AituberError::ConfigError(_) => true,
            AituberError::ChannelError(_) => true,
        }
    }

    /// Check if this error is recoverable without restarting
    pub fn is_recoverable(&self) -> bool {
        match self {
            AituberError::DialogueUnavailable(_) => true,
            AituberError::SynthesisUnavailable(_) => true,
            AituberError::AnimationSinkUnavailable(_) => true,
            AituberError::TranscriptionError(_) => true,
            AituberError::AudioDeviceError(_) => false,
            AituberError::AudioProcessingError(_) => true,
            AituberError::IOError(_) => false,
            AituberError::ConfigError(_) => false,
            AituberError::ChannelError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AituberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_failure_never_aborts_turn() {
        let e = AituberError::AnimationSinkUnavailable("gone".into());
        assert!(!e.aborts_turn());
        assert!(e.is_recoverable());
    }

    #[test]
    fn test_collaborator_failures_abort_turn() {
        assert!(AituberError::DialogueUnavailable("down".into()).aborts_turn());
        assert!(AituberError::SynthesisUnavailable("down".into()).aborts_turn());
    }
}
