//! Transcript sources.
//!
//! Everything downstream only sees `Transcript` events on a tokio channel.
//! Two producers exist: the microphone source (cpal capture, Silero VAD
//! segmentation, whisper-rs transcription on a worker thread) and a stdin
//! console source for text-only runs.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// A transcription event from a source
#[derive(Clone, Debug)]
pub struct Transcript {
    pub text: String,
    /// Partial hypotheses carry `false` and never advance the pipeline
    pub is_final: bool,
}

impl Transcript {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Reads lines from stdin and emits them as finalized transcripts
pub struct ConsoleSource;

impl ConsoleSource {
    pub fn spawn(tx: mpsc::Sender<Transcript>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};

            info!("Console transcript source ready, type and press enter");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(Transcript::final_text(line)).await.is_err() {
                    break;
                }
            }
            debug!("Console transcript source closed");
        })
    }
}

#[cfg(feature = "audio-io")]
pub use mic::{MicSource, WhisperConfig, WhisperEngine};

#[cfg(feature = "audio-io")]
mod mic {
    use std::path::PathBuf;

    use crossbeam_channel::{bounded, Receiver, Sender};
    use tokio::sync::mpsc;
    use tracing::{debug, error, info, warn};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use super::Transcript;
    use crate::audio::input::MicCapture;
    use crate::audio::resample;
    use crate::audio::vad::VoiceActivityDetector;
    use crate::config::SttSettings;
    use crate::{AituberError, Result};

    const WHISPER_SAMPLE_RATE: u32 = 16000;

    /// Configuration for the Whisper speech-to-text engine
    #[derive(Clone, Debug)]
    pub struct WhisperConfig {
        pub model_path: PathBuf,
        pub language: Option<String>,
        pub n_threads: i32,
        /// Minimum speech segment duration in seconds
        pub min_segment_duration: f32,
        /// Maximum speech segment duration in seconds
        pub max_segment_duration: f32,
        /// Silence duration that finalizes a segment (seconds)
        pub silence_threshold: f32,
        pub vad_threshold: f32,
    }

    impl Default for WhisperConfig {
        fn default() -> Self {
            Self {
                model_path: PathBuf::from("models/ggml-base.en.bin"),
                language: Some("en".to_string()),
                n_threads: 4,
                min_segment_duration: 0.3,
                max_segment_duration: 30.0,
                silence_threshold: 0.8,
                vad_threshold: 0.5,
            }
        }
    }

    impl From<&SttSettings> for WhisperConfig {
        fn from(s: &SttSettings) -> Self {
            Self {
                model_path: PathBuf::from(&s.model_path),
                language: Some(s.language.clone()),
                n_threads: 4,
                min_segment_duration: s.min_speech_duration_ms as f32 / 1000.0,
                max_segment_duration: s.max_segment_duration_secs,
                silence_threshold: s.silence_duration_ms as f32 / 1000.0,
                vad_threshold: s.vad_threshold,
            }
        }
    }

    /// Whisper speech-to-text engine
    pub struct WhisperEngine {
        config: WhisperConfig,
        context: WhisperContext,
    }

    impl WhisperEngine {
        pub fn new(config: WhisperConfig) -> Result<Self> {
            info!("Loading Whisper model from: {:?}", config.model_path);

            if !config.model_path.exists() {
                return Err(AituberError::TranscriptionError(format!(
                    "Model file not found: {:?}",
                    config.model_path
                )));
            }

            let ctx = WhisperContext::new_with_params(
                config
                    .model_path
                    .to_str()
                    .ok_or_else(|| AituberError::TranscriptionError("Invalid model path".to_string()))?,
                WhisperContextParameters::default(),
            )
            .map_err(|e| {
                AituberError::TranscriptionError(format!("Failed to load Whisper model: {:?}", e))
            })?;

            info!("Whisper model loaded successfully");

            Ok(Self { config, context: ctx })
        }

        /// Transcribe a mono 16kHz segment
        pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
            if samples.is_empty() {
                return Err(AituberError::TranscriptionError(
                    "Empty audio segment".to_string(),
                ));
            }

            debug!(
                "Transcribing audio segment: {} samples, {:.2}s duration",
                samples.len(),
                samples.len() as f32 / WHISPER_SAMPLE_RATE as f32
            );

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_n_threads(self.config.n_threads);
            params.set_translate(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);

            if let Some(ref lang) = self.config.language {
                params.set_language(Some(lang));
            }

            let mut state = self.context.create_state().map_err(|e| {
                AituberError::TranscriptionError(format!("Failed to create state: {:?}", e))
            })?;

            state.full(params, samples).map_err(|e| {
                AituberError::TranscriptionError(format!("Transcription failed: {:?}", e))
            })?;

            let num_segments = state.full_n_segments().map_err(|e| {
                AituberError::TranscriptionError(format!("Failed to get segments: {:?}", e))
            })?;

            let mut text = String::new();
            for i in 0..num_segments {
                let segment_text = state.full_get_segment_text(i).map_err(|e| {
                    AituberError::TranscriptionError(format!("Failed to get segment text: {:?}", e))
                })?;
                text.push_str(&segment_text);
            }

            debug!("Transcription result: '{}'", text.trim());
            Ok(text.trim().to_string())
        }
    }

    enum SegmentCommand {
        Transcribe(Vec<f32>),
        Shutdown,
    }

    /// Microphone transcript source.
    ///
    /// Capture callback feeds a crossbeam channel; a segmentation thread runs
    /// VAD over fixed chunks and accumulates a segment until trailing silence
    /// or the maximum duration; a second thread owns the Whisper context and
    /// pushes finalized transcripts into the tokio channel.
    pub struct MicSource {
        capture: MicCapture,
        command_tx: Sender<SegmentCommand>,
    }

    impl MicSource {
        pub fn start(settings: &SttSettings, tx: mpsc::Sender<Transcript>) -> Result<Self> {
            let config = WhisperConfig::from(settings);

            let (audio_tx, audio_rx) = bounded::<Vec<f32>>(100);
            let (command_tx, command_rx) = bounded::<SegmentCommand>(100);

            let capture = MicCapture::open(audio_tx)?;
            let device_rate = capture.sample_rate();

            Self::spawn_segmenter(config.clone(), device_rate, audio_rx, command_tx.clone())?;
            Self::spawn_transcriber(config, command_rx, tx);

            Ok(Self {
                capture,
                command_tx,
            })
        }

        fn spawn_segmenter(
            config: WhisperConfig,
            device_rate: u32,
            audio_rx: Receiver<Vec<f32>>,
            command_tx: Sender<SegmentCommand>,
        ) -> Result<()> {
            let mut vad = VoiceActivityDetector::new(WHISPER_SAMPLE_RATE, config.vad_threshold)?;
            let chunk_size = vad.chunk_size();

            std::thread::spawn(move || {
                info!("Segmentation worker started");

                let mut pending: Vec<f32> = Vec::new();
                let mut segment: Vec<f32> = Vec::new();
                let mut in_speech = false;
                let mut silence_duration = 0.0f32;
                let chunk_duration = chunk_size as f32 / WHISPER_SAMPLE_RATE as f32;

                while let Ok(samples) = audio_rx.recv() {
                    pending.extend(resample(&samples, device_rate, WHISPER_SAMPLE_RATE));

                    while pending.len() >= chunk_size {
                        let chunk: Vec<f32> = pending.drain(0..chunk_size).collect();
                        let is_speech = vad.is_speech(&chunk);

                        if is_speech {
                            if !in_speech {
                                in_speech = true;
                                segment.clear();
                                debug!("Speech started");
                            }
                            segment.extend_from_slice(&chunk);
                            silence_duration = 0.0;

                            let duration = segment.len() as f32 / WHISPER_SAMPLE_RATE as f32;
                            if duration >= config.max_segment_duration {
                                debug!("Maximum segment duration reached");
                                if command_tx
                                    .send(SegmentCommand::Transcribe(std::mem::take(&mut segment)))
                                    .is_err()
                                {
                                    return;
                                }
                                in_speech = false;
                                silence_duration = 0.0;
                                vad.reset();
                            }
                        } else if in_speech {
                            segment.extend_from_slice(&chunk);
                            silence_duration += chunk_duration;

                            if silence_duration >= config.silence_threshold {
                                let duration = segment.len() as f32 / WHISPER_SAMPLE_RATE as f32;
                                if duration >= config.min_segment_duration {
                                    debug!("Silence threshold reached, finalizing segment");
                                    if command_tx
                                        .send(SegmentCommand::Transcribe(std::mem::take(
                                            &mut segment,
                                        )))
                                        .is_err()
                                    {
                                        return;
                                    }
                                } else {
                                    debug!("Segment too short ({:.2}s), discarding", duration);
                                    segment.clear();
                                }
                                in_speech = false;
                                silence_duration = 0.0;
                                vad.reset();
                            }
                        }
                    }
                }

                info!("Segmentation worker stopped");
            });

            Ok(())
        }

        fn spawn_transcriber(
            config: WhisperConfig,
            command_rx: Receiver<SegmentCommand>,
            tx: mpsc::Sender<Transcript>,
        ) {
            std::thread::spawn(move || {
                info!("Transcription worker started");

                let engine = match WhisperEngine::new(config) {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!("Failed to initialize Whisper engine: {}", e);
                        return;
                    }
                };

                loop {
                    match command_rx.recv() {
                        Ok(SegmentCommand::Transcribe(samples)) => {
                            match engine.transcribe(&samples) {
                                Ok(text) if !text.is_empty() => {
                                    if tx.blocking_send(Transcript::final_text(text)).is_err() {
                                        break;
                                    }
                                }
                                Ok(_) => debug!("Empty transcription, skipped"),
                                Err(e) => warn!("Transcription error: {}", e),
                            }
                        }
                        Ok(SegmentCommand::Shutdown) | Err(_) => break,
                    }
                }

                info!("Transcription worker stopped");
            });
        }

        pub fn stop(&mut self) {
            self.capture.stop();
            let _ = self.command_tx.send(SegmentCommand::Shutdown);
        }
    }

    impl Drop for MicSource {
        fn drop(&mut self) {
            self.stop();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_whisper_config_default() {
            let config = WhisperConfig::default();
            assert_eq!(config.language, Some("en".to_string()));
            assert_eq!(config.n_threads, 4);
        }

        #[test]
        fn test_config_from_settings() {
            let settings = SttSettings {
                silence_duration_ms: 600,
                min_speech_duration_ms: 250,
                ..SttSettings::default()
            };
            let config = WhisperConfig::from(&settings);
            assert!((config.silence_threshold - 0.6).abs() < 1e-6);
            assert!((config.min_segment_duration - 0.25).abs() < 1e-6);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_finality() {
        assert!(Transcript::final_text("hello").is_final);
        assert!(!Transcript::partial("hel").is_final);
    }
}
