//! Speech synthesis and lip-sync envelope extraction.
//!
//! The synthesizer returns finished playback units: decoded audio plus a
//! precomputed mouth-open envelope the pipeline replays against its own
//! clock. Envelope points are windowed RMS values pushed through a log-scale
//! mapping and a short smoothing history, so the mouth tracks perceived
//! loudness instead of raw amplitude.

use std::collections::VecDeque;
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::audio::AudioData;
use crate::config::SynthesisSettings;
use crate::{AituberError, Result};

/// One scheduled mouth position, relative to playback start
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopePoint {
    pub offset: Duration,
    pub mouth_open: f32,
}

/// A synthesized utterance ready to play
#[derive(Clone, Debug)]
pub struct AudioPlayback {
    pub audio: AudioData,
    pub duration: Duration,
    pub envelope: Vec<EnvelopePoint>,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioPlayback>;
}

/// Client for a GPT-SoVITS-style HTTP synthesis server
pub struct SovitsSynthesizer {
    http: reqwest::Client,
    settings: SynthesisSettings,
}

impl SovitsSynthesizer {
    pub fn new(settings: SynthesisSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| AituberError::SynthesisUnavailable(e.to_string()))?;

        Ok(Self { http, settings })
    }

    fn envelope_interval(&self) -> Duration {
        Duration::from_millis(self.settings.envelope_interval_ms)
    }
}

#[async_trait]
impl SpeechSynthesizer for SovitsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioPlayback> {
        debug!(chars = text.chars().count(), "Synthesizing chunk");

        let response = self
            .http
            .get(&self.settings.server_url)
            .query(&[
                ("text", text),
                ("text_lang", self.settings.text_lang.as_str()),
                ("ref_audio_path", self.settings.ref_audio_path.as_str()),
                ("prompt_text", self.settings.prompt_text.as_str()),
                ("prompt_lang", self.settings.prompt_lang.as_str()),
                ("text_split_method", "cut5"),
                ("batch_size", "1"),
                ("media_type", "wav"),
                ("streaming_mode", "false"),
            ])
            .send()
            .await
            .map_err(|e| AituberError::SynthesisUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AituberError::SynthesisUnavailable(format!(
                "{} returned {}",
                self.settings.server_url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AituberError::SynthesisUnavailable(e.to_string()))?;

        let audio = decode_wav(&body)?;
        let duration = Duration::from_secs_f64(audio.samples.len() as f64 / audio.sample_rate as f64);
        let envelope = extract_envelope(&audio, self.envelope_interval());

        Ok(AudioPlayback {
            audio,
            duration,
            envelope,
        })
    }
}

/// Decode a WAV body into mono f32 samples
pub fn decode_wav(bytes: &[u8]) -> Result<AudioData> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AituberError::SynthesisUnavailable(format!("WAV decode failed: {}", e)))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| AituberError::SynthesisUnavailable(format!("WAV decode failed: {}", e)))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| AituberError::SynthesisUnavailable(format!("WAV decode failed: {}", e)))?,
    };

    // Average interleaved channels to mono
    let mono: Vec<f32> = if channels <= 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioData::new(mono, spec.sample_rate, 1))
}

/// Scale of the RMS-to-mouth mapping, expressed in 16-bit sample units
const RMS_DIVISOR: f32 = 5000.0;
const MOUTH_GAIN: f32 = 0.3;
const SMOOTHING_WINDOWS: usize = 3;

/// Compute the mouth-open envelope for a decoded utterance.
///
/// One point per interval; each value is `min(0.3 * ln(1 + rms/5000), 1.0)`
/// on a 16-bit RMS scale, averaged over the last three windows.
pub fn extract_envelope(audio: &AudioData, interval: Duration) -> Vec<EnvelopePoint> {
    let window = ((audio.sample_rate as f64 * interval.as_secs_f64()) as usize).max(1);
    let mut history: VecDeque<f32> = VecDeque::with_capacity(SMOOTHING_WINDOWS);
    let mut points = Vec::with_capacity(audio.samples.len() / window + 1);

    for (i, chunk) in audio.samples.chunks(window).enumerate() {
        let mean_square: f32 =
            chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len().max(1) as f32;
        let rms = mean_square.sqrt() * 32768.0;
        let raw = (MOUTH_GAIN * (1.0 + rms / RMS_DIVISOR).ln()).min(1.0);

        if history.len() == SMOOTHING_WINDOWS {
            history.pop_front();
        }
        history.push_back(raw);
        let smoothed = history.iter().sum::<f32>() / history.len() as f32;

        points.push(EnvelopePoint {
            offset: interval * i as u32,
            mouth_open: smoothed,
        });
    }

    points
}

/// Prepare reply text for synthesis: collapse whitespace and soften ellipses
pub fn normalize_for_synthesis(text: &str) -> String {
    let softened = text.replace("...", "… ");
    softened.split_whitespace().collect::<Vec<_>>().join(" ")
}

const SENTENCE_TERMINATORS: [char; 8] = ['.', '!', '?', '…', '。', '！', '？', '；'];

/// Split reply text into synthesis chunks at sentence boundaries.
///
/// Sentences are packed greedily up to `max_chars` characters; an oversized
/// sentence falls back to word boundaries, and an oversized word to a hard
/// character split (no-space scripts).
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for sentence in split_sentences(text) {
        let sentence_chars = sentence.chars().count();

        if current_chars + sentence_chars > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current).trim().to_string());
            current_chars = 0;
        }

        if sentence_chars > max_chars {
            for piece in split_oversized(&sentence, max_chars) {
                chunks.push(piece);
            }
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(sentence.trim());
        current_chars += sentence.trim().chars().count();
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn split_oversized(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for word in sentence.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            // Hard split for scripts without spaces
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                pieces.push(piece.iter().collect());
            }
            continue;
        }

        if current_chars + word_chars + 1 > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(word);
        current_chars += word_chars;
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(sample_rate: u32, secs: f32, amplitude: f32) -> AudioData {
        let n = (sample_rate as f32 * secs) as usize;
        let samples = (0..n)
            .map(|i| amplitude * (i as f32 * 0.1).sin())
            .collect();
        AudioData::new(samples, sample_rate, 1)
    }

    #[test]
    fn test_envelope_point_spacing() {
        let audio = tone(16000, 1.0, 0.5);
        let envelope = extract_envelope(&audio, Duration::from_millis(50));

        assert_eq!(envelope.len(), 20);
        assert_eq!(envelope[0].offset, Duration::ZERO);
        assert_eq!(envelope[1].offset, Duration::from_millis(50));
        assert_eq!(envelope[19].offset, Duration::from_millis(950));
    }

    #[test]
    fn test_envelope_silence_is_closed() {
        let audio = AudioData::new(vec![0.0; 16000], 16000, 1);
        let envelope = extract_envelope(&audio, Duration::from_millis(50));
        assert!(envelope.iter().all(|p| p.mouth_open == 0.0));
    }

    #[test]
    fn test_envelope_loud_opens_mouth() {
        let audio = tone(16000, 0.5, 0.8);
        let envelope = extract_envelope(&audio, Duration::from_millis(50));
        // Steady loud tone settles well above closed and never exceeds full open
        assert!(envelope.last().map(|p| p.mouth_open > 0.3).unwrap_or(false));
        assert!(envelope.iter().all(|p| p.mouth_open <= 1.0));
    }

    #[test]
    fn test_envelope_offsets_increase() {
        let audio = tone(32000, 0.7, 0.4);
        let envelope = extract_envelope(&audio, Duration::from_millis(50));
        for pair in envelope.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }

    #[test]
    fn test_decode_wav_i16_mono() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..1600i32 {
                writer.write_sample((i % 100) as i16 * 100).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples.len(), 1600);
        assert!(audio.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_decode_wav_stereo_mixes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(10000i16).unwrap();
                writer.write_sample(-10000i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.samples.len(), 100);
        assert!(audio.samples.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            normalize_for_synthesis("hello\n\nworld   again"),
            "hello world again"
        );
    }

    #[test]
    fn test_normalize_softens_ellipsis() {
        assert_eq!(normalize_for_synthesis("well... maybe"), "well… maybe");
    }

    #[test]
    fn test_chunks_respect_sentences() {
        let chunks = split_into_chunks("First one. Second one! Third one?", 20);
        assert_eq!(chunks, vec!["First one.", "Second one!", "Third one?"]);
    }

    #[test]
    fn test_chunks_pack_short_sentences() {
        let chunks = split_into_chunks("Hi. Yes. No.", 40);
        assert_eq!(chunks, vec!["Hi. Yes. No."]);
    }

    #[test]
    fn test_oversized_sentence_splits_on_words() {
        let chunks =
            split_into_chunks("this sentence just keeps going without any end in sight", 20);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_oversized_word_hard_splits() {
        let long_word = "a".repeat(50);
        let chunks = split_into_chunks(&long_word, 20);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split_into_chunks("   ", 40).is_empty());
    }
}
