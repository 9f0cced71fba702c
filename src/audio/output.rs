use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{resample, AudioData, PlaybackSink};
use crate::{AituberError, Result};

/// Speaker playback through the default cpal output device.
///
/// Synthesized audio is queued into a shared buffer drained by the output
/// callback; `clear` empties the buffer so interruption cuts audio within
/// one callback period. The cpal stream is not `Send`, so this lives on a
/// dedicated thread behind [`CpalPlayback`].
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<Mutex<Vec<f32>>>,
}

impl AudioOutput {
    /// Create a new audio output with the default output device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| AituberError::AudioDeviceError("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_output_config()
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to get output config: {}", e)))?
            .into();

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start the output stream; it idles on silence until audio is queued
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let buffer = Arc::clone(&self.buffer);

        let err_fn = |err| {
            error!("Audio output stream error: {}", err);
        };

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buf = buffer.lock();
                    let frames_needed = data.len() / channels;
                    let frames_available = buf.len().min(frames_needed);

                    for i in 0..frames_available {
                        let sample = buf[i];
                        for c in 0..channels {
                            data[i * channels + c] = sample;
                        }
                    }
                    buf.drain(0..frames_available);

                    for value in data.iter_mut().skip(frames_available * channels) {
                        *value = 0.0;
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to start output stream: {}", e)))?;

        self.stream = Some(stream);
        info!("Started audio playback stream");
        Ok(())
    }

    fn enqueue(&self, audio: &AudioData) {
        let device_rate = self.sample_rate();
        let resampled = resample(&audio.samples, audio.sample_rate, device_rate);
        self.buffer.lock().extend_from_slice(&resampled);
    }

    fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.clear();
        self.stream.take();
    }
}

enum PlaybackCommand {
    Play(AudioData),
    Stop,
    Shutdown,
}

/// Sendable playback handle; the stream itself lives on a worker thread
pub struct CpalPlayback {
    tx: Sender<PlaybackCommand>,
}

impl CpalPlayback {
    /// Open the default output device on a dedicated thread
    pub fn start() -> Result<Self> {
        let (tx, rx) = unbounded::<PlaybackCommand>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        std::thread::spawn(move || {
            let output = match AudioOutput::new().and_then(|mut o| {
                o.start()?;
                Ok(o)
            }) {
                Ok(output) => {
                    let _ = ready_tx.send(Ok(()));
                    output
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(command) = rx.recv() {
                match command {
                    PlaybackCommand::Play(audio) => output.enqueue(&audio),
                    PlaybackCommand::Stop => output.clear(),
                    PlaybackCommand::Shutdown => break,
                }
            }
            debug!("Playback worker stopped");
        });

        ready_rx
            .recv()
            .map_err(|_| AituberError::ChannelError("Playback worker died".into()))??;

        Ok(Self { tx })
    }
}

impl PlaybackSink for CpalPlayback {
    fn play(&mut self, audio: &AudioData) -> Result<()> {
        self.tx
            .send(PlaybackCommand::Play(audio.clone()))
            .map_err(|e| AituberError::ChannelError(e.to_string()))
    }

    fn stop(&mut self) {
        let _ = self.tx.send(PlaybackCommand::Stop);
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.tx.send(PlaybackCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_output_creation() {
        // This test might fail in CI environments without audio devices
        if let Ok(output) = AudioOutput::new() {
            assert!(output.sample_rate() > 0);
        }
    }
}
