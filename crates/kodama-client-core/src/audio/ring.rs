//! Lock-free single-producer/single-consumer PCM ring
//!
//! The message-delivery thread owns [`PcmWriter`], the audio render callback
//! owns [`PcmRenderer`]. Positions are absolute sample counts; the slot of a
//! position is `pos % capacity`.
//!
//! Ownership of the shared atomics:
//! - writer: `write_pos`, `drop_until`, `channels`
//! - reader: `read_pos`, `underruns`
//!
//! The reader starts from `max(read_pos, drop_until)`, so drift correction
//! never stores into the reader's cursor. Samples are `f32` bit patterns in
//! `AtomicU32` slots; a reader racing a trim may see a mix of old and new
//! samples but never undefined data.

use super::{drift_ceiling, sample_to_f32};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    samples: Box<[AtomicU32]>,
    write_pos: AtomicU64,
    drop_until: AtomicU64,
    channels: AtomicUsize,
    read_pos: AtomicU64,
    underruns: AtomicU64,
}

impl Shared {
    fn slot(&self, pos: u64) -> &AtomicU32 {
        &self.samples[(pos % self.samples.len() as u64) as usize]
    }
}

/// Create a ring holding up to `capacity` interleaved samples
///
/// A zero capacity is raised to one sample.
pub fn pcm_ring(capacity: usize) -> (PcmWriter, PcmRenderer) {
    let capacity = capacity.max(1);
    let samples: Box<[AtomicU32]> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
    let shared = Arc::new(Shared {
        samples,
        write_pos: AtomicU64::new(0),
        drop_until: AtomicU64::new(0),
        channels: AtomicUsize::new(1),
        read_pos: AtomicU64::new(0),
        underruns: AtomicU64::new(0),
    });
    (
        PcmWriter {
            shared: shared.clone(),
            ceiling: capacity,
            dropped: 0,
        },
        PcmRenderer { shared },
    )
}

/// Producer half, fed with PCM chunks from the network
pub struct PcmWriter {
    shared: Arc<Shared>,
    ceiling: usize,
    dropped: u64,
}

impl PcmWriter {
    /// Append a chunk of interleaved signed 16-bit little-endian PCM.
    ///
    /// Recomputes the drift ceiling (200 ms at `sample_rate` × `channels`,
    /// limited to the ring capacity). If the chunk would push the buffered
    /// amount over the ceiling, the oldest buffered samples are dropped
    /// first. A chunk larger than the ceiling keeps only its newest samples.
    pub fn write_chunk(&mut self, pcm: &[u8], sample_rate: u32, channels: u8) {
        if channels == 0 || sample_rate == 0 {
            tracing::trace!(sample_rate, channels, "Ignoring PCM chunk without format");
            return;
        }
        let shared = &*self.shared;
        let channels = channels as usize;
        shared.channels.store(channels, Ordering::Release);
        self.ceiling = drift_ceiling(sample_rate, channels).min(shared.samples.len());

        let total = pcm.len() / 2;
        let kept = total.min(self.ceiling);
        let skipped = total - kept;

        let write = shared.write_pos.load(Ordering::Relaxed);
        let start = self.effective_read(write);
        let buffered = (write - start) as usize;

        if buffered + kept > self.ceiling {
            let excess = (buffered + kept - self.ceiling) as u64;
            // Published before the new samples so the reader skips the
            // slots about to be overwritten.
            shared.drop_until.store(start + excess, Ordering::Release);
            self.dropped += excess;
        }
        self.dropped += skipped as u64;

        let mut pos = write;
        for pair in pcm.chunks_exact(2).skip(skipped) {
            let sample = sample_to_f32(i16::from_le_bytes([pair[0], pair[1]]));
            shared.slot(pos).store(sample.to_bits(), Ordering::Relaxed);
            pos += 1;
        }
        shared.write_pos.store(pos, Ordering::Release);
    }

    /// Samples written and not yet rendered or dropped
    pub fn buffered(&self) -> usize {
        let write = self.shared.write_pos.load(Ordering::Relaxed);
        (write - self.effective_read(write)) as usize
    }

    /// Current drift ceiling in samples
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Samples discarded by drift correction so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Render pulls that found too little data
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.samples.len()
    }

    fn effective_read(&self, write: u64) -> u64 {
        let read = self.shared.read_pos.load(Ordering::Acquire);
        let dropped = self.shared.drop_until.load(Ordering::Relaxed);
        read.max(dropped).min(write)
    }
}

/// Consumer half, pulled by the audio render callback
///
/// Never blocks, allocates or logs.
pub struct PcmRenderer {
    shared: Arc<Shared>,
}

impl PcmRenderer {
    /// Fill one render quantum of planar output.
    ///
    /// The quantum is `outputs[0].len()` frames. On underrun the outputs are
    /// left untouched. Source channels beyond `outputs.len()` are discarded;
    /// a mono source is written to the first output only. Always returns
    /// `true` so the caller keeps the render callback alive.
    pub fn render(&mut self, outputs: &mut [&mut [f32]]) -> bool {
        let frames = match outputs.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return true,
        };
        let Some((mut pos, channels)) = self.claim(frames) else {
            return true;
        };
        let shared = &*self.shared;

        if channels > 1 {
            for frame in 0..frames {
                for ch in 0..channels {
                    let sample = f32::from_bits(shared.slot(pos).load(Ordering::Relaxed));
                    pos += 1;
                    if let Some(slot) = outputs.get_mut(ch).and_then(|out| out.get_mut(frame)) {
                        *slot = sample;
                    }
                }
            }
        } else {
            for slot in outputs[0].iter_mut() {
                *slot = f32::from_bits(shared.slot(pos).load(Ordering::Relaxed));
                pos += 1;
            }
        }

        shared.read_pos.store(pos, Ordering::Release);
        true
    }

    /// Fill an interleaved device buffer of `out_channels` channels.
    ///
    /// Same underrun and channel-discard policy as [`render`](Self::render),
    /// except that a mono source is copied to every device channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], out_channels: usize) -> bool {
        if out_channels == 0 {
            return true;
        }
        let frames = out.len() / out_channels;
        if frames == 0 {
            return true;
        }
        let Some((mut pos, channels)) = self.claim(frames) else {
            return true;
        };
        let shared = &*self.shared;

        for frame in out.chunks_exact_mut(out_channels) {
            if channels == 1 {
                let sample = f32::from_bits(shared.slot(pos).load(Ordering::Relaxed));
                pos += 1;
                frame.fill(sample);
                continue;
            }
            for ch in 0..channels {
                let sample = f32::from_bits(shared.slot(pos).load(Ordering::Relaxed));
                pos += 1;
                if let Some(slot) = frame.get_mut(ch) {
                    *slot = sample;
                }
            }
        }

        shared.read_pos.store(pos, Ordering::Release);
        true
    }

    /// Samples available to the next pull
    pub fn available(&self) -> usize {
        let write = self.shared.write_pos.load(Ordering::Acquire);
        let start = self.start();
        write.saturating_sub(start) as usize
    }

    /// Render pulls that found too little data
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    fn start(&self) -> u64 {
        let read = self.shared.read_pos.load(Ordering::Relaxed);
        let dropped = self.shared.drop_until.load(Ordering::Acquire);
        read.max(dropped)
    }

    /// Start position and channel count if `frames` frames are buffered
    fn claim(&self, frames: usize) -> Option<(u64, usize)> {
        let shared = &*self.shared;
        let channels = shared.channels.load(Ordering::Acquire).max(1);
        let write = shared.write_pos.load(Ordering::Acquire);
        let start = self.start();
        let needed = (frames * channels) as u64;
        if write.saturating_sub(start) < needed {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some((start, channels))
    }
}
