use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::{AituberError, Result};

/// Capture stream over the default input device.
///
/// Runs from `open` until dropped, pushing mono sample blocks at the native
/// device rate into the given channel. Multichannel input is averaged down
/// in the callback; resampling happens downstream, where the consumer knows
/// its target rate.
pub struct MicCapture {
    stream: Option<Stream>,
    sample_rate: u32,
}

impl MicCapture {
    pub fn open(audio_tx: Sender<Vec<f32>>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| AituberError::AudioDeviceError("No input device available".into()))?;

        info!(
            "Capturing from input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config: cpal::StreamConfig = device
            .default_input_config()
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to get input config: {}", e)))?
            .into();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let err_fn = |err| {
            error!("Audio input stream error: {}", err);
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };

                    if let Err(e) = audio_tx.try_send(mono) {
                        debug!("Capture channel full, dropped a block: {}", e);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AituberError::AudioDeviceError(format!("Failed to start input stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            sample_rate,
        })
    }

    /// Native rate of the capture stream
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("Stopped microphone capture");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_capture_open() {
        // May be skipped in environments without audio devices
        let (tx, _rx) = bounded(10);
        if let Ok(capture) = MicCapture::open(tx) {
            assert!(capture.sample_rate() > 0);
        }
    }
}
