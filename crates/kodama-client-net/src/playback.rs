//! Audio output through cpal
//!
//! The device callback drains a [`PcmRenderer`]; on underrun it plays
//! silence.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use kodama_client_core::PcmRenderer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No audio output device available")]
    NoDevice,

    #[error("Unsupported output configuration: {0}")]
    Config(String),

    #[error("Failed to open stream: {0}")]
    Stream(String),
}

/// A running output stream; audio stops when dropped
///
/// `cpal::Stream` is not `Send` on every platform, so create and keep this on
/// the thread that owns the session listeners.
pub struct PcmPlayback {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl PcmPlayback {
    /// Open the default output device at `sample_rate` and start rendering
    pub fn start(mut renderer: PcmRenderer, sample_rate: u32) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;
        let config = output_config(&device, sample_rate)?;
        let channels = config.channels;

        if config.sample_rate.0 != sample_rate {
            tracing::warn!(
                requested = sample_rate,
                actual = config.sample_rate.0,
                "Device does not support the source rate; playback pitch will shift"
            );
        }

        let out_channels = channels as usize;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                    renderer.render_interleaved(data, out_channels);
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels,
            "Audio playback started"
        );
        Ok(Self {
            _stream: stream,
            sample_rate: config.sample_rate.0,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Prefer an f32 config that supports `sample_rate`, else the device default
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig, PlaybackError> {
    let wanted = SampleRate(sample_rate);
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted).config());
            }
        }
    }
    let default = device
        .default_output_config()
        .map_err(|e| PlaybackError::Config(e.to_string()))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(PlaybackError::Config(format!(
            "default format {:?} is not f32",
            default.sample_format()
        )));
    }
    Ok(default.config())
}
