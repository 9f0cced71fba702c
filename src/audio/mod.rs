#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
#[cfg(feature = "audio-io")]
pub mod vad;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Decoded mono audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Where spoken audio goes.
///
/// The pipeline drives lip-sync from its own clock, so the sink only needs to
/// accept audio and to cut it off on interruption.
pub trait PlaybackSink: Send {
    fn play(&mut self, audio: &AudioData) -> Result<()>;

    /// Drop any queued audio immediately
    fn stop(&mut self);
}

/// Linear-interpolation resampling, good enough for speech
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = vec![0.0; 1000];
        let out = resample(&samples, 32000, 16000);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn test_duration() {
        let audio = AudioData::new(vec![0.0; 16000], 16000, 1);
        assert!((audio.duration_seconds() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty() {
        let audio = AudioData::new(Vec::new(), 16000, 1);
        assert!(audio.is_empty());
    }
}
