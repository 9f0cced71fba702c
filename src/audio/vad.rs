use voice_activity_detector::VoiceActivityDetector as VadDetector;
use tracing::info;

use crate::{AituberError, Result};

/// Voice Activity Detection using Silero VAD
pub struct VoiceActivityDetector {
    detector: VadDetector,
    sample_rate: u32,
    threshold: f32,
}

impl VoiceActivityDetector {
    /// Create a new VAD instance
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate of the audio (8000 or 16000)
    /// * `threshold` - Probability threshold for speech detection (0.0-1.0)
    pub fn new(sample_rate: u32, threshold: f32) -> Result<Self> {
        if ![8000, 16000].contains(&sample_rate) {
            return Err(AituberError::ConfigError(format!(
                "Invalid sample rate: {}. Must be 8000 or 16000",
                sample_rate
            )));
        }

        let chunk_size: usize = match sample_rate {
            8000 => 256,  // 32ms at 8kHz
            16000 => 512, // 32ms at 16kHz
            _ => 512,
        };

        let detector = VadDetector::builder()
            .sample_rate(sample_rate as i32)
            .chunk_size(chunk_size)
            .build()
            .map_err(|e| AituberError::AudioProcessingError(format!("Failed to create VAD: {:?}", e)))?;

        info!(
            "Initialized VAD with sample rate: {}, threshold: {}",
            sample_rate, threshold
        );

        Ok(Self {
            detector,
            sample_rate,
            threshold,
        })
    }

    /// Detect if the audio chunk contains speech
    pub fn is_speech(&mut self, audio: &[f32]) -> bool {
        self.detector.predict(audio.iter().copied()) >= self.threshold
    }

    /// Reset the VAD session state
    pub fn reset(&mut self) {
        self.detector.reset();
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Recommended chunk size in samples (512 at 16kHz, 32ms)
    pub fn chunk_size(&self) -> usize {
        match self.sample_rate {
            8000 => 256,
            16000 => 512,
            _ => 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_creation() {
        let vad = VoiceActivityDetector::new(16000, 0.5);
        assert!(vad.is_ok());
    }

    #[test]
    fn test_invalid_sample_rate() {
        let vad = VoiceActivityDetector::new(44100, 0.5);
        assert!(vad.is_err());
    }

    #[test]
    fn test_silence_detection() {
        if let Ok(mut vad) = VoiceActivityDetector::new(16000, 0.5) {
            let silence = vec![0.0f32; 512];
            assert!(!vad.is_speech(&silence));
        }
    }

    #[test]
    fn test_chunk_size() {
        if let Ok(vad) = VoiceActivityDetector::new(16000, 0.5) {
            assert_eq!(vad.chunk_size(), 512);
        }
    }
}
