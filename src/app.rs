//! Listener wiring
//!
//! Runs on the session thread: [`install`] subscribes the recorder, the
//! audio path and the log listeners to the session's event bus.

use crate::config::ClientConfig;
use crate::record::FileSinkFactory;
use kodama_client_core::protocol::event::{AudioDataEvent, VideoInitEvent, VideoSegmentEvent};
use kodama_client_core::{
    AudioRouter, Event, EventBus, EventKind, LiveSegmentQueue, PcmRenderer, SegmentOutcome,
    VideoStats,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

/// Records every camera (or one selected camera) to fMP4 files.
///
/// File appends complete before `append` returns, so every append is
/// acknowledged right away and segments never wait in the queue. The
/// queue's backlog and overflow flush only come into play with sinks that
/// complete later.
pub struct Recorder {
    queue: LiveSegmentQueue<FileSinkFactory>,
    camera: Option<String>,
    /// Sources already recovered since their last init
    recovered: HashSet<String>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>, queue_limit: usize, camera: Option<String>) -> Self {
        Self {
            queue: LiveSegmentQueue::with_limit(FileSinkFactory::new(dir), queue_limit),
            camera,
            recovered: HashSet::new(),
        }
    }

    fn wants(&self, source_id: &str) -> bool {
        self.camera.as_deref().map_or(true, |c| c == source_id)
    }

    pub fn on_init(&mut self, init: &VideoInitEvent) {
        if !self.wants(&init.source_id) {
            return;
        }
        self.recovered.remove(&init.source_id);
        match self.queue.on_init(init) {
            Ok(_) => self.settle(&init.source_id),
            Err(e) => tracing::warn!(source = %init.source_id, error = %e, "Recording not started"),
        }
    }

    /// Append a segment; a source that lost its sink is rebuilt once from
    /// its last init
    pub fn on_segment(&mut self, segment: &VideoSegmentEvent) -> SegmentOutcome {
        if !self.wants(&segment.source_id) {
            return SegmentOutcome::Dropped;
        }
        let outcome = match self.queue.on_segment(segment) {
            Ok(SegmentOutcome::Dropped) if !self.recovered.contains(&segment.source_id) => {
                self.recovered.insert(segment.source_id.clone());
                match self.queue.recover(&segment.source_id) {
                    Ok(Some(_)) => {
                        self.settle(&segment.source_id);
                        self.queue
                            .on_segment(segment)
                            .unwrap_or(SegmentOutcome::Dropped)
                    }
                    Ok(None) => SegmentOutcome::Dropped,
                    Err(e) => {
                        tracing::warn!(source = %segment.source_id, error = %e, "Recovery failed");
                        SegmentOutcome::Dropped
                    }
                }
            }
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(source = %segment.source_id, error = %e, "Segment not recorded");
                SegmentOutcome::Dropped
            }
        };
        self.settle(&segment.source_id);
        outcome
    }

    /// File appends finish synchronously; acknowledge them until idle
    fn settle(&mut self, source_id: &str) {
        while self.queue.is_updating(source_id) {
            let Some(sink) = self.queue.sink_id(source_id) else {
                break;
            };
            if let Err(e) = self.queue.on_append_complete(source_id, sink) {
                tracing::warn!(source = %source_id, error = %e, "Append failed");
                break;
            }
        }
    }

    pub fn stop(&mut self, source_id: &str) {
        self.queue.teardown(source_id);
    }

    pub fn stop_all(&mut self) {
        self.queue.teardown_all();
    }

    pub fn stats(&self, source_id: &str) -> Option<&VideoStats> {
        self.queue.stats(source_id)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Routes one camera's audio into a ring and hands its renderer to the output
pub struct AudioPath {
    router: AudioRouter,
    camera: Option<String>,
    output: Option<Box<dyn FnMut(PcmRenderer, u32)>>,
}

impl AudioPath {
    /// `camera` None locks onto the first source heard
    pub fn new(camera: Option<String>) -> Self {
        Self {
            router: AudioRouter::new(),
            camera,
            output: None,
        }
    }

    /// Called once with the selected source's renderer and sample rate
    pub fn with_output<O>(mut self, output: O) -> Self
    where
        O: FnMut(PcmRenderer, u32) + 'static,
    {
        self.output = Some(Box::new(output));
        self
    }

    pub fn selected(&self) -> Option<&str> {
        self.camera.as_deref()
    }

    pub fn on_audio(&mut self, event: &AudioDataEvent) {
        match self.camera.as_deref() {
            Some(camera) if camera != event.source_id => return,
            Some(_) => {}
            None => {
                tracing::info!(source = %event.source_id, "Playing audio from first camera heard");
                self.camera = Some(event.source_id.clone());
            }
        }
        if let Some(renderer) = self.router.on_audio(event) {
            match self.output.as_mut() {
                Some(output) => output(renderer, event.sample_rate),
                None => tracing::debug!(source = %event.source_id, "No audio output attached"),
            }
        }
    }

    pub fn router(&self) -> &AudioRouter {
        &self.router
    }
}

/// Subscribe the client's listeners according to `config`
pub fn install(bus: &EventBus, config: &ClientConfig) {
    bus.on(EventKind::Telemetry, |event| {
        if let Event::Telemetry(t) = event {
            tracing::debug!(
                source = %t.source_id,
                cpu = t.data.cpu_usage,
                memory = t.data.memory_usage,
                disk = t.data.disk_usage,
                "Telemetry"
            );
        }
    });

    bus.on(EventKind::AudioLevel, |event| {
        if let Event::AudioLevel(level) = event {
            tracing::trace!(source = %level.source_id, level_db = level.level_db, "Audio level");
        }
    });

    let recorder = config.video.record_dir.as_ref().map(|dir| {
        tracing::info!(dir = %dir.display(), "Recording enabled");
        Rc::new(RefCell::new(Recorder::new(
            dir.clone(),
            config.video.queue_limit,
            config.camera.clone(),
        )))
    });

    {
        let recorder = recorder.clone();
        bus.on(EventKind::Camera, move |event| {
            if let Event::Camera(camera) = event {
                tracing::info!(source = %camera.source_id, connected = camera.connected, "Camera presence");
                if !camera.connected {
                    if let Some(recorder) = &recorder {
                        recorder.borrow_mut().stop(&camera.source_id);
                    }
                }
            }
        });
    }

    if let Some(recorder) = recorder {
        let on_init = recorder.clone();
        bus.on(EventKind::VideoInit, move |event| {
            if let Event::VideoInit(init) = event {
                on_init.borrow_mut().on_init(init);
            }
        });
        bus.on(EventKind::VideoSegment, move |event| {
            if let Event::VideoSegment(segment) = event {
                recorder.borrow_mut().on_segment(segment);
            }
        });
    }

    if config.audio.enabled {
        let audio = Rc::new(RefCell::new(
            AudioPath::new(config.camera.clone()).with_output(output_for_device()),
        ));
        bus.on(EventKind::AudioData, move |event| {
            if let Event::AudioData(data) = event {
                audio.borrow_mut().on_audio(data);
            }
        });
    }
}

#[cfg(feature = "playback")]
fn output_for_device() -> impl FnMut(PcmRenderer, u32) + 'static {
    use kodama_client_net::playback::PcmPlayback;

    // The stream stops when dropped
    let mut active: Option<PcmPlayback> = None;
    move |renderer, sample_rate| match PcmPlayback::start(renderer, sample_rate) {
        Ok(started) => {
            active.replace(started);
        }
        Err(e) => {
            tracing::error!(error = %e, "Audio playback unavailable");
            active.take();
        }
    }
}

#[cfg(not(feature = "playback"))]
fn output_for_device() -> impl FnMut(PcmRenderer, u32) + 'static {
    |_renderer, sample_rate| {
        tracing::info!(sample_rate, "Audio received; build with the `playback` feature to hear it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kodama_client_core::protocol::event::CameraEvent;

    fn init(source: &str) -> VideoInitEvent {
        VideoInitEvent {
            source_id: source.to_string(),
            codec: "avc1.42e01e".to_string(),
            width: 640,
            height: 480,
            init_segment: Bytes::from_static(b"INIT"),
        }
    }

    fn segment(source: &str, data: &'static [u8]) -> VideoSegmentEvent {
        VideoSegmentEvent {
            source_id: source.to_string(),
            data: Bytes::from_static(data),
        }
    }

    fn recording(dir: &std::path::Path) -> Vec<u8> {
        let entry = std::fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        std::fs::read(entry.path()).unwrap()
    }

    #[test]
    fn test_recorder_writes_init_then_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path(), 30, None);
        recorder.on_init(&init("aa"));
        assert_eq!(recorder.on_segment(&segment("aa", b"S1")), SegmentOutcome::Appended);
        assert_eq!(recorder.on_segment(&segment("aa", b"S2")), SegmentOutcome::Appended);
        recorder.stop_all();

        assert_eq!(recording(dir.path()), b"INITS1S2");
        assert_eq!(recorder.stats("aa"), None);
    }

    #[test]
    fn test_recorder_camera_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path(), 30, Some("aa".to_string()));
        recorder.on_init(&init("bb"));
        assert_eq!(recorder.on_segment(&segment("bb", b"S1")), SegmentOutcome::Dropped);
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[test]
    fn test_recorder_segment_before_init_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path(), 30, None);
        assert_eq!(recorder.on_segment(&segment("aa", b"S1")), SegmentOutcome::Dropped);
    }

    #[test]
    fn test_recorder_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path(), 30, None);
        recorder.on_init(&init("aa"));
        recorder.on_segment(&segment("aa", b"S1"));
        let stats = recorder.stats("aa").unwrap();
        assert_eq!(stats.segments_appended, 1);
        assert_eq!(stats.bytes_appended, 6);
        assert_eq!((stats.width, stats.height), (640, 480));
    }

    fn chunk(source: &str) -> AudioDataEvent {
        AudioDataEvent {
            source_id: source.to_string(),
            data: Bytes::from(vec![0u8; 960]),
            sample_rate: 48000,
            channels: 1,
        }
    }

    #[test]
    fn test_audio_locks_onto_first_source() {
        let started = Rc::new(RefCell::new(Vec::new()));
        let log = started.clone();
        let mut audio = AudioPath::new(None).with_output(move |_r, rate| log.borrow_mut().push(rate));

        audio.on_audio(&chunk("aa"));
        audio.on_audio(&chunk("bb"));
        audio.on_audio(&chunk("aa"));

        assert_eq!(audio.selected(), Some("aa"));
        assert_eq!(*started.borrow(), vec![48000]);
        // two 480-sample mono chunks
        assert_eq!(audio.router().writer("aa").unwrap().buffered(), 960);
        assert!(audio.router().writer("bb").is_none());
    }

    #[test]
    fn test_install_with_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.video.record_dir = Some(dir.path().to_path_buf());
        config.audio.enabled = false;

        let bus = EventBus::new();
        install(&bus, &config);
        assert_eq!(bus.listener_count(EventKind::VideoInit), 1);
        assert_eq!(bus.listener_count(EventKind::AudioData), 0);

        bus.emit(&Event::VideoInit(init("aa")));
        bus.emit(&Event::VideoSegment(segment("aa", b"S1")));
        assert_eq!(bus.emit(&Event::VideoSegment(segment("aa", b"S2"))), 0);
    }

    #[test]
    fn test_install_records_only_selected_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.video.record_dir = Some(dir.path().to_path_buf());
        config.audio.enabled = false;
        config.camera = Some("aa".to_string());

        let bus = EventBus::new();
        install(&bus, &config);
        bus.emit(&Event::VideoInit(init("bb")));
        bus.emit(&Event::VideoSegment(segment("bb", b"S1")));
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);

        bus.emit(&Event::VideoInit(init("aa")));
        bus.emit(&Event::VideoSegment(segment("aa", b"S1")));
        // Disconnect closes the file
        bus.emit(&Event::Camera(CameraEvent {
            source_id: "aa".to_string(),
            connected: false,
        }));
        assert_eq!(recording(dir.path()), b"INITS1");
    }
}
