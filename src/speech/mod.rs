pub mod stt;
pub mod tts;

pub use stt::{ConsoleSource, Transcript};
pub use tts::{AudioPlayback, EnvelopePoint, SovitsSynthesizer, SpeechSynthesizer};
