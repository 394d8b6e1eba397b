//! Live segment queue with drop-to-live-edge backpressure
//!
//! Per source the queue holds at most one in-flight append. Segments that
//! arrive meanwhile wait in FIFO order. When the backlog would grow past the
//! limit, the whole backlog is flushed and only the newest segment is kept:
//! a gap in the picture is acceptable, an ever-growing delay is not. The
//! in-flight append is never cancelled.
//!
//! Completions and readiness carry the [`SinkId`] of the sink that raised
//! them. Those from a sink already replaced by a newer init are ignored.

use super::{BitrateMeter, MediaSink, SinkFactory, SinkId, VideoStats};
use crate::error::SinkError;
use crate::protocol::event::{VideoInitEvent, VideoSegmentEvent};
use crate::DEFAULT_SEGMENT_QUEUE_LIMIT;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// What happened to a segment handed to [`LiveSegmentQueue::on_segment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Appended immediately
    Appended,
    /// Waiting behind the in-flight append
    Queued,
    /// Backlog of this many segments flushed; the segment is next in line
    Flushed(usize),
    /// No sink for the source
    Dropped,
}

struct SourceState<S> {
    sink: Option<S>,
    sink_id: Option<SinkId>,
    init_pending: Option<Bytes>,
    pending: VecDeque<Bytes>,
    updating: bool,
    ready: bool,
    init: Option<VideoInitEvent>,
    stats: VideoStats,
    bitrate: BitrateMeter,
}

impl<S: MediaSink> SourceState<S> {
    fn new() -> Self {
        Self {
            sink: None,
            sink_id: None,
            init_pending: None,
            pending: VecDeque::new(),
            updating: false,
            ready: false,
            init: None,
            stats: VideoStats::default(),
            bitrate: BitrateMeter::default(),
        }
    }

    fn release_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
        self.sink_id = None;
        self.init_pending = None;
        self.pending.clear();
        self.updating = false;
        self.ready = false;
    }
}

/// Paces video segments into one [`MediaSink`] per source
pub struct LiveSegmentQueue<F: SinkFactory> {
    factory: F,
    limit: usize,
    next_sink: u64,
    sources: HashMap<String, SourceState<F::Sink>>,
}

impl<F: SinkFactory> LiveSegmentQueue<F> {
    pub fn new(factory: F) -> Self {
        Self::with_limit(factory, DEFAULT_SEGMENT_QUEUE_LIMIT)
    }

    /// Queue that flushes once more than `limit` segments would be waiting
    pub fn with_limit(factory: F, limit: usize) -> Self {
        Self {
            factory,
            limit: limit.max(1),
            next_sink: 0,
            sources: HashMap::new(),
        }
    }

    /// Start (or restart) a source's video path from an init event.
    ///
    /// Any existing sink is released and its backlog discarded. Returns the
    /// new sink's id. On an unsupported codec or a failed sink creation no
    /// sink exists afterwards and later segments are dropped until the next
    /// init.
    pub fn on_init(&mut self, init: &VideoInitEvent) -> Result<SinkId, SinkError> {
        let state = self
            .sources
            .entry(init.source_id.clone())
            .or_insert_with(SourceState::new);
        state.release_sink();
        state.init = Some(init.clone());
        state.stats.width = init.width;
        state.stats.height = init.height;
        state.stats.codec = init.codec.clone();

        let mime = init.mime_type();
        if !self.factory.is_type_supported(&mime) {
            tracing::warn!(source = %init.source_id, mime = %mime, "Codec not supported");
            return Err(SinkError::UnsupportedCodec(init.codec.clone()));
        }

        self.next_sink += 1;
        let id = SinkId(self.next_sink);
        let sink = match self.factory.create(id, init) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(source = %init.source_id, error = %e, "Failed to create video sink");
                return Err(e);
            }
        };
        tracing::info!(
            source = %init.source_id,
            codec = %init.codec,
            width = init.width,
            height = init.height,
            sink = id.0,
            "Video sink created"
        );
        state.ready = sink.is_ready();
        state.sink = Some(sink);
        state.sink_id = Some(id);
        state.init_pending = Some(init.init_segment.clone());
        Self::pump(&init.source_id, state)?;
        Ok(id)
    }

    /// Sink `id` started accepting appends
    pub fn on_sink_ready(&mut self, source_id: &str, id: SinkId) -> Result<(), SinkError> {
        let Some(state) = self.current(source_id, id) else {
            return Ok(());
        };
        state.ready = true;
        Self::pump(source_id, state)
    }

    /// Append a media segment now, or queue it behind the in-flight append
    pub fn on_segment(&mut self, event: &VideoSegmentEvent) -> Result<SegmentOutcome, SinkError> {
        let Some(state) = self.sources.get_mut(&event.source_id) else {
            tracing::trace!(source = %event.source_id, "Segment before init, dropped");
            return Ok(SegmentOutcome::Dropped);
        };
        if state.sink.is_none() {
            state.stats.segments_dropped += 1;
            tracing::trace!(source = %event.source_id, "Segment without sink, dropped");
            return Ok(SegmentOutcome::Dropped);
        }
        state.stats.bitrate_kbps = state.bitrate.record(event.data.len());

        let idle = state.ready
            && !state.updating
            && state.init_pending.is_none()
            && state.pending.is_empty();
        if idle {
            state.pending.push_back(event.data.clone());
            Self::pump(&event.source_id, state)?;
            return Ok(SegmentOutcome::Appended);
        }

        let outcome = if state.pending.len() >= self.limit {
            let flushed = state.pending.len();
            state.pending.clear();
            state.stats.segments_dropped += flushed as u64;
            state.stats.overflow_flushes += 1;
            tracing::warn!(
                source = %event.source_id,
                flushed,
                "Queue overflow: flushed {} segments to live edge",
                flushed
            );
            SegmentOutcome::Flushed(flushed)
        } else {
            SegmentOutcome::Queued
        };
        state.pending.push_back(event.data.clone());
        Ok(outcome)
    }

    /// Sink `id` finished its in-flight append; start the next one in FIFO
    /// order
    pub fn on_append_complete(&mut self, source_id: &str, id: SinkId) -> Result<(), SinkError> {
        let Some(state) = self.current(source_id, id) else {
            return Ok(());
        };
        state.updating = false;
        Self::pump(source_id, state)
    }

    /// State of `source_id` if `id` is its current sink
    fn current(&mut self, source_id: &str, id: SinkId) -> Option<&mut SourceState<F::Sink>> {
        let state = self.sources.get_mut(source_id)?;
        if state.sink_id != Some(id) {
            tracing::trace!(source = %source_id, sink = id.0, "Signal from replaced sink ignored");
            return None;
        }
        Some(state)
    }

    /// Release the source's sink and forget it entirely
    pub fn teardown(&mut self, source_id: &str) {
        if let Some(mut state) = self.sources.remove(source_id) {
            state.release_sink();
            tracing::debug!(source = %source_id, "Video source torn down");
        }
    }

    /// Release every sink
    pub fn teardown_all(&mut self) {
        let ids: Vec<String> = self.sources.keys().cloned().collect();
        for id in ids {
            self.teardown(&id);
        }
    }

    /// Rebuild the sink from the last init seen for the source.
    ///
    /// Returns `Ok(None)` when no init has been seen.
    pub fn recover(&mut self, source_id: &str) -> Result<Option<SinkId>, SinkError> {
        let Some(init) = self.sources.get(source_id).and_then(|s| s.init.clone()) else {
            return Ok(None);
        };
        tracing::info!(source = %source_id, "Recovering video sink");
        self.on_init(&init).map(Some)
    }

    pub fn stats(&self, source_id: &str) -> Option<&VideoStats> {
        self.sources.get(source_id).map(|s| &s.stats)
    }

    /// Id of the source's current sink
    pub fn sink_id(&self, source_id: &str) -> Option<SinkId> {
        self.sources.get(source_id).and_then(|s| s.sink_id)
    }

    /// Whether the source currently has a sink
    pub fn is_initialized(&self, source_id: &str) -> bool {
        self.sources
            .get(source_id)
            .is_some_and(|s| s.sink.is_some())
    }

    /// Whether an append is in flight for the source
    pub fn is_updating(&self, source_id: &str) -> bool {
        self.sources.get(source_id).is_some_and(|s| s.updating)
    }

    /// Segments waiting behind the in-flight append
    pub fn pending_len(&self, source_id: &str) -> usize {
        self.sources.get(source_id).map_or(0, |s| s.pending.len())
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    fn pump(source_id: &str, state: &mut SourceState<F::Sink>) -> Result<(), SinkError> {
        if !state.ready || state.updating {
            return Ok(());
        }
        let Some(sink) = state.sink.as_mut() else {
            return Ok(());
        };
        let (data, is_media) = match state.init_pending.take() {
            Some(init) => (init, false),
            None => match state.pending.pop_front() {
                Some(segment) => (segment, true),
                None => return Ok(()),
            },
        };

        match sink.append(&data) {
            Ok(()) => {
                state.updating = true;
                if is_media {
                    state.stats.segments_appended += 1;
                }
                state.stats.bytes_appended += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "Append rejected, sink released");
                state.release_sink();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        appends: Vec<Vec<u8>>,
        /// Sink that received each append
        owners: Vec<SinkId>,
        released: usize,
        created: usize,
    }

    struct MockSink {
        id: SinkId,
        log: Rc<RefCell<Log>>,
        ready: bool,
        reject: bool,
    }

    impl MediaSink for MockSink {
        fn append(&mut self, data: &[u8]) -> Result<(), SinkError> {
            if self.reject {
                return Err(SinkError::AppendRejected("quota".to_string()));
            }
            let mut log = self.log.borrow_mut();
            log.appends.push(data.to_vec());
            log.owners.push(self.id);
            Ok(())
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn release(&mut self) {
            self.log.borrow_mut().released += 1;
        }
    }

    #[derive(Default)]
    struct MockFactory {
        log: Rc<RefCell<Log>>,
        start_unready: bool,
        reject_appends: bool,
    }

    impl SinkFactory for MockFactory {
        type Sink = MockSink;

        fn is_type_supported(&self, mime: &str) -> bool {
            mime.contains("avc1")
        }

        fn create(&mut self, id: SinkId, _init: &VideoInitEvent) -> Result<MockSink, SinkError> {
            self.log.borrow_mut().created += 1;
            Ok(MockSink {
                id,
                log: self.log.clone(),
                ready: !self.start_unready,
                reject: self.reject_appends,
            })
        }
    }

    fn init(codec: &str) -> VideoInitEvent {
        VideoInitEvent {
            source_id: "cam1".to_string(),
            codec: codec.to_string(),
            width: 1280,
            height: 720,
            init_segment: Bytes::from_static(b"INIT"),
        }
    }

    fn segment(n: u8) -> VideoSegmentEvent {
        VideoSegmentEvent {
            source_id: "cam1".to_string(),
            data: Bytes::from(vec![n]),
        }
    }

    fn queue() -> (LiveSegmentQueue<MockFactory>, Rc<RefCell<Log>>) {
        let factory = MockFactory::default();
        let log = factory.log.clone();
        (LiveSegmentQueue::new(factory), log)
    }

    #[test]
    fn test_init_segment_appended_first() {
        let (mut q, log) = queue();
        let id = q.on_init(&init("avc1.42e01e")).unwrap();
        assert_eq!(q.sink_id("cam1"), Some(id));
        assert_eq!(log.borrow().appends, vec![b"INIT".to_vec()]);
        assert!(q.is_updating("cam1"));

        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Queued);
        q.on_append_complete("cam1", id).unwrap();
        assert_eq!(log.borrow().appends[1], vec![1]);
    }

    #[test]
    fn test_unsupported_codec() {
        let (mut q, log) = queue();
        let err = q.on_init(&init("hvc1.1.6.L93.B0")).unwrap_err();
        assert_eq!(err, SinkError::UnsupportedCodec("hvc1.1.6.L93.B0".to_string()));
        assert_eq!(err.to_string(), "Codec not supported: hvc1.1.6.L93.B0");
        assert_eq!(log.borrow().created, 0);
        assert!(!q.is_initialized("cam1"));
        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Dropped);
        assert_eq!(q.stats("cam1").unwrap().segments_dropped, 1);
    }

    #[test]
    fn test_segment_before_init_dropped() {
        let (mut q, log) = queue();
        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Dropped);
        assert!(log.borrow().appends.is_empty());
    }

    #[test]
    fn test_no_concurrent_appends() {
        let (mut q, log) = queue();
        let id = q.on_init(&init("avc1")).unwrap();
        q.on_append_complete("cam1", id).unwrap();

        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Appended);
        for n in 2..6 {
            assert_eq!(q.on_segment(&segment(n)).unwrap(), SegmentOutcome::Queued);
        }
        // Only the init and the first segment reached the sink
        assert_eq!(log.borrow().appends.len(), 2);
        assert_eq!(q.pending_len("cam1"), 4);

        for expected in 2..6u8 {
            q.on_append_complete("cam1", id).unwrap();
            assert_eq!(log.borrow().appends.last().unwrap(), &vec![expected]);
        }
        q.on_append_complete("cam1", id).unwrap();
        assert!(!q.is_updating("cam1"));
        assert_eq!(q.stats("cam1").unwrap().segments_appended, 5);
    }

    #[test]
    fn test_overflow_flushes_backlog_keeps_newest() {
        let factory = MockFactory::default();
        let log = factory.log.clone();
        let mut q = LiveSegmentQueue::with_limit(factory, 3);
        let id = q.on_init(&init("avc1")).unwrap();
        q.on_append_complete("cam1", id).unwrap();

        q.on_segment(&segment(0)).unwrap();
        for n in 1..4 {
            assert_eq!(q.on_segment(&segment(n)).unwrap(), SegmentOutcome::Queued);
        }
        assert_eq!(q.on_segment(&segment(9)).unwrap(), SegmentOutcome::Flushed(3));
        assert_eq!(q.pending_len("cam1"), 1);

        // The in-flight append is untouched; the newest segment goes next
        q.on_append_complete("cam1", id).unwrap();
        let appends = log.borrow().appends.clone();
        assert_eq!(appends, vec![b"INIT".to_vec(), vec![0], vec![9]]);

        let stats = q.stats("cam1").unwrap();
        assert_eq!(stats.overflow_flushes, 1);
        assert_eq!(stats.segments_dropped, 3);
    }

    #[test]
    fn test_default_limit() {
        let (mut q, _log) = queue();
        q.on_init(&init("avc1")).unwrap();
        for n in 0..30 {
            assert_eq!(q.on_segment(&segment(n)).unwrap(), SegmentOutcome::Queued);
        }
        assert_eq!(q.on_segment(&segment(30)).unwrap(), SegmentOutcome::Flushed(30));
    }

    #[test]
    fn test_waits_for_sink_ready() {
        let factory = MockFactory {
            start_unready: true,
            ..Default::default()
        };
        let log = factory.log.clone();
        let mut q = LiveSegmentQueue::new(factory);
        let id = q.on_init(&init("avc1")).unwrap();
        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Queued);
        assert!(log.borrow().appends.is_empty());

        q.on_sink_ready("cam1", id).unwrap();
        assert_eq!(log.borrow().appends, vec![b"INIT".to_vec()]);
        q.on_append_complete("cam1", id).unwrap();
        assert_eq!(log.borrow().appends.len(), 2);
    }

    #[test]
    fn test_reinit_discards_queue() {
        let (mut q, log) = queue();
        q.on_init(&init("avc1")).unwrap();
        q.on_segment(&segment(1)).unwrap();
        q.on_segment(&segment(2)).unwrap();

        q.on_init(&init("avc1.640028")).unwrap();
        assert_eq!(log.borrow().released, 1);
        assert_eq!(q.pending_len("cam1"), 0);
        assert_eq!(q.stats("cam1").unwrap().codec, "avc1.640028");
    }

    #[test]
    fn test_append_rejected_leaves_uninitialized() {
        let factory = MockFactory {
            reject_appends: true,
            ..Default::default()
        };
        let log = factory.log.clone();
        let mut q = LiveSegmentQueue::new(factory);

        let err = q.on_init(&init("avc1")).unwrap_err();
        assert!(matches!(err, SinkError::AppendRejected(_)));
        assert!(!q.is_initialized("cam1"));
        assert_eq!(log.borrow().released, 1);
        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Dropped);

        // Recovery rebuilds from the cached init
        q.factory_mut().reject_appends = false;
        let recovered = q.recover("cam1").unwrap();
        assert!(recovered.is_some());
        assert_eq!(q.sink_id("cam1"), recovered);
        assert!(q.is_initialized("cam1"));
        assert_eq!(log.borrow().appends, vec![b"INIT".to_vec()]);
    }

    #[test]
    fn test_recover_without_init() {
        let (mut q, _log) = queue();
        assert_eq!(q.recover("cam1").unwrap(), None);
    }

    #[test]
    fn test_teardown_releases() {
        let (mut q, log) = queue();
        q.on_init(&init("avc1")).unwrap();
        q.on_segment(&segment(1)).unwrap();
        q.teardown("cam1");

        assert_eq!(log.borrow().released, 1);
        assert!(q.stats("cam1").is_none());
        assert_eq!(q.pending_len("cam1"), 0);
        assert_eq!(q.on_segment(&segment(2)).unwrap(), SegmentOutcome::Dropped);
    }

    #[test]
    fn test_sources_independent() {
        let (mut q, log) = queue();
        let first = q.on_init(&init("avc1")).unwrap();
        let mut other = init("avc1");
        other.source_id = "cam2".to_string();
        let second = q.on_init(&other).unwrap();
        assert_ne!(first, second);

        // A completion names its own source's sink only
        q.on_append_complete("cam2", first).unwrap();
        assert!(q.is_updating("cam2"));
        q.on_append_complete("cam2", second).unwrap();
        q.on_segment(&VideoSegmentEvent {
            source_id: "cam2".to_string(),
            data: Bytes::from_static(&[7]),
        })
        .unwrap();
        assert_eq!(log.borrow().appends.len(), 3);
        assert!(q.is_updating("cam1"));

        q.teardown_all();
        assert_eq!(log.borrow().released, 2);
    }

    #[test]
    fn test_late_completion_from_replaced_sink_ignored() {
        let (mut q, log) = queue();
        let old = q.on_init(&init("avc1")).unwrap();
        let new = q.on_init(&init("avc1")).unwrap();
        assert_ne!(old, new);
        assert_eq!(q.on_segment(&segment(1)).unwrap(), SegmentOutcome::Queued);

        // The released sink's init append finishing must not unblock the new sink
        q.on_append_complete("cam1", old).unwrap();
        assert!(q.is_updating("cam1"));
        assert_eq!(q.pending_len("cam1"), 1);
        assert_eq!(log.borrow().owners, vec![old, new]);

        q.on_append_complete("cam1", new).unwrap();
        assert_eq!(log.borrow().owners, vec![old, new, new]);
        assert_eq!(log.borrow().appends.last().unwrap(), &vec![1]);
    }

    #[test]
    fn test_ready_from_replaced_sink_ignored() {
        let factory = MockFactory {
            start_unready: true,
            ..Default::default()
        };
        let log = factory.log.clone();
        let mut q = LiveSegmentQueue::new(factory);
        let old = q.on_init(&init("avc1")).unwrap();
        let new = q.on_init(&init("avc1")).unwrap();

        q.on_sink_ready("cam1", old).unwrap();
        assert!(log.borrow().appends.is_empty());
        q.on_sink_ready("cam1", new).unwrap();
        assert_eq!(log.borrow().owners, vec![new]);
    }

    #[test]
    fn test_completion_after_teardown_ignored() {
        let (mut q, log) = queue();
        let id = q.on_init(&init("avc1")).unwrap();
        q.teardown("cam1");
        q.on_append_complete("cam1", id).unwrap();
        q.on_sink_ready("cam1", id).unwrap();
        assert_eq!(log.borrow().appends.len(), 1);
        assert_eq!(q.sink_id("cam1"), None);
    }
}
