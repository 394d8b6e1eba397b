//! Audio playback buffering
//!
//! - Lock-free PCM ring between network delivery and the render callback ([`ring`])
//! - Per-source routing of audio-data events into rings ([`AudioRouter`])

pub mod ring;

use crate::protocol::event::AudioDataEvent;
use ring::{pcm_ring, PcmRenderer, PcmWriter};
use std::collections::HashMap;

/// Highest sample rate a ring is sized for
pub const MAX_SAMPLE_RATE: u32 = 96000;

/// Highest channel count a ring is sized for
pub const MAX_CHANNELS: usize = 2;

/// Ring capacity in samples: one second at the maximum rate and channel count
pub const RING_CAPACITY: usize = MAX_SAMPLE_RATE as usize * MAX_CHANNELS;

/// Normalize a signed 16-bit sample to `[-1.0, 1.0)`
#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Drift ceiling: 200 ms of interleaved samples
#[inline]
pub fn drift_ceiling(sample_rate: u32, channels: usize) -> usize {
    (sample_rate / 5) as usize * channels
}

/// Routes audio-data events to one ring per source
pub struct AudioRouter {
    capacity: usize,
    writers: HashMap<String, PcmWriter>,
}

impl AudioRouter {
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    /// Router whose rings hold `capacity` samples each
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            writers: HashMap::new(),
        }
    }

    /// Feed one chunk into its source's ring.
    ///
    /// The first chunk of a new source creates the ring and returns its
    /// renderer, which the caller hands to the audio output.
    pub fn on_audio(&mut self, event: &AudioDataEvent) -> Option<PcmRenderer> {
        let mut renderer = None;
        let writer = self
            .writers
            .entry(event.source_id.clone())
            .or_insert_with(|| {
                let (writer, r) = pcm_ring(self.capacity);
                tracing::info!(
                    source = %event.source_id,
                    sample_rate = event.sample_rate,
                    channels = event.channels,
                    "New audio source"
                );
                renderer = Some(r);
                writer
            });
        writer.write_chunk(&event.data, event.sample_rate, event.channels);
        renderer
    }

    pub fn writer(&self, source_id: &str) -> Option<&PcmWriter> {
        self.writers.get(source_id)
    }

    /// Forget a source; its renderer sees no more data
    pub fn remove(&mut self, source_id: &str) -> bool {
        self.writers.remove(source_id).is_some()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }
}

impl Default for AudioRouter {
    fn default() -> Self {
        Self::new()
    }
}
