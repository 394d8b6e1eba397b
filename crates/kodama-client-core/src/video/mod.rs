//! Live video buffering
//!
//! Video arrives as one fMP4 init segment followed by media segments. A
//! [`MediaSink`] accepts one append at a time; [`queue::LiveSegmentQueue`]
//! paces segments into it and drops backlog to stay at the live edge.

pub mod queue;

use crate::error::SinkError;
use crate::protocol::event::VideoInitEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Identifies one sink instance. Every init creates a sink with a fresh id,
/// so completions from a released sink can be told apart from its
/// replacement's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

/// Buffered-media sink that accepts one pending append at a time
pub trait MediaSink {
    /// Start appending `data`. Completion is reported to the queue through
    /// [`queue::LiveSegmentQueue::on_append_complete`] with the sink's id.
    fn append(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Whether the sink accepts appends yet
    fn is_ready(&self) -> bool {
        true
    }

    /// Release the sink's resources; no appends follow
    fn release(&mut self);
}

/// Creates sinks for video init events
pub trait SinkFactory {
    type Sink: MediaSink;

    /// Whether the platform can play `mime`, e.g. `video/mp4; codecs="avc1.42e01e"`
    fn is_type_supported(&self, mime: &str) -> bool;

    /// Create the sink that will report its completions as `id`
    fn create(&mut self, id: SinkId, init: &VideoInitEvent) -> Result<Self::Sink, SinkError>;
}

/// Window over which the bitrate estimate is averaged
const BITRATE_WINDOW_SECS: i64 = 2;

/// Per-source video quality counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoStats {
    pub width: u16,
    pub height: u16,
    pub codec: String,
    /// Media segments handed to the sink
    pub segments_appended: u64,
    /// Segments discarded (no sink, or flushed on overflow)
    pub segments_dropped: u64,
    /// Times the backlog was flushed to the live edge
    pub overflow_flushes: u64,
    pub bytes_appended: u64,
    /// Estimated from segments received in the last two seconds
    pub bitrate_kbps: f64,
}

/// Sliding window of segment arrivals for the bitrate estimate
#[derive(Debug, Default)]
pub(crate) struct BitrateMeter {
    recent: VecDeque<(DateTime<Utc>, usize)>,
}

impl BitrateMeter {
    pub(crate) fn record(&mut self, bytes: usize) -> f64 {
        self.record_at(Utc::now(), bytes)
    }

    pub(crate) fn record_at(&mut self, now: DateTime<Utc>, bytes: usize) -> f64 {
        let cutoff = now - Duration::seconds(BITRATE_WINDOW_SECS);
        while self.recent.front().is_some_and(|(t, _)| *t < cutoff) {
            self.recent.pop_front();
        }
        self.recent.push_back((now, bytes));
        let total: usize = self.recent.iter().map(|(_, b)| b).sum();
        (total * 8) as f64 / BITRATE_WINDOW_SECS as f64 / 1000.0
    }
}
