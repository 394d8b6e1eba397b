//! E2E tests for frame dispatch through a session
//!
//! Uses the sans-IO session with recording socket and timer doubles, so
//! every transition is driven explicitly.

use bytes::Bytes;
use kodama_client::protocol::envelope::to_envelope;
use kodama_client::protocol::event::{CameraEvent, CameraInfo, TelemetryData};
use kodama_client::protocol::encode;
use kodama_client::{Event, EventKind, SessionConfig, SessionState, SourceId};
use kodama_client_core::{ConnectionError, Scheduler, Session, SocketFactory, SocketId, TimerId};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Sockets {
    opened: Vec<(SocketId, String)>,
    closed: Vec<SocketId>,
}

impl SocketFactory for Sockets {
    fn open(&mut self, id: SocketId, url: &str) {
        self.opened.push((id, url.to_string()));
    }

    fn close(&mut self, id: SocketId) {
        self.closed.push(id);
    }
}

#[derive(Default)]
struct Timers {
    scheduled: Vec<(TimerId, Duration)>,
}

impl Scheduler for Timers {
    fn schedule(&mut self, id: TimerId, delay: Duration) {
        self.scheduled.push((id, delay));
    }

    fn cancel(&mut self, _id: TimerId) {}
}

fn session() -> Session<Sockets, Timers> {
    Session::new(SessionConfig::default(), Sockets::default(), Timers::default())
}

fn current_socket(s: &Session<Sockets, Timers>) -> SocketId {
    s.factory().opened.last().unwrap().0
}

const CAM: SourceId = SourceId([0, 1, 2, 3, 4, 5, 6, 7]);

/// Each frame kind reaches only the listeners of its kind
#[test]
fn test_frames_routed_by_kind() {
    let mut s = session();
    let seen: Rc<RefCell<Vec<EventKind>>> = Rc::default();
    for kind in EventKind::ALL {
        let seen = seen.clone();
        s.bus().on(kind, move |event| seen.borrow_mut().push(event.kind()));
    }

    let mut rx = s.connect(Some("ws://nvr.local:3000/ws"));
    let id = current_socket(&s);
    s.on_open(id);
    assert_eq!(rx.try_recv().unwrap(), Ok(()));
    assert_eq!(s.factory().opened[0].1, "ws://nvr.local:3000/ws");

    let frames = [
        encode::video_init(&CAM, "avc1.42e01e", 640, 480, b"INIT").unwrap(),
        encode::video_segment(&CAM, b"SEG"),
        encode::telemetry(&CAM, &TelemetryData::default()).unwrap(),
        encode::audio_level(&CAM, -6.0),
        encode::audio_data(&CAM, 16000, 1, &[0, 0]),
    ];
    for frame in &frames {
        s.on_binary(id, frame);
    }

    assert_eq!(
        *seen.borrow(),
        vec![
            EventKind::VideoInit,
            EventKind::VideoSegment,
            EventKind::Telemetry,
            EventKind::AudioLevel,
            EventKind::AudioData,
        ]
    );
    assert_eq!(s.stats().frames_received, 5);
    assert_eq!(s.last_video_init(&CAM.to_hex()).unwrap().codec, "avc1.42e01e");
}

/// A camera list frame fans out into one camera event per entry
#[test]
fn test_camera_list_fan_out() {
    let mut s = session();
    let cameras: Rc<RefCell<Vec<(String, bool)>>> = Rc::default();
    {
        let cameras = cameras.clone();
        s.bus().on(EventKind::Camera, move |event| {
            if let Event::Camera(c) = event {
                cameras.borrow_mut().push((c.source_id.clone(), c.connected));
            }
        });
    }
    let _rx = s.connect(None);
    let id = current_socket(&s);
    s.on_open(id);

    let list = vec![
        CameraInfo {
            id: "aa".to_string(),
            name: "Gate".to_string(),
            connected: true,
        },
        CameraInfo {
            id: "bb".to_string(),
            name: "Yard".to_string(),
            connected: false,
        },
    ];
    s.on_binary(id, &encode::camera_list(&list).unwrap());
    assert_eq!(
        *cameras.borrow(),
        vec![("aa".to_string(), true), ("bb".to_string(), false)]
    );
}

/// Text envelopes dispatch like binary frames; junk text is ignored
#[test]
fn test_text_envelope() {
    let mut s = session();
    let count = Rc::new(RefCell::new(0));
    {
        let count = count.clone();
        s.bus().on(EventKind::Camera, move |_| *count.borrow_mut() += 1);
    }
    let _rx = s.connect(None);
    let id = current_socket(&s);
    s.on_open(id);

    let envelope = to_envelope(&Event::Camera(CameraEvent {
        source_id: "aa".to_string(),
        connected: true,
    }))
    .unwrap();
    s.on_text(id, &envelope);
    s.on_text(id, "not json");
    s.on_text(id, r#"{"type":"camera","payload":null}"#);
    assert_eq!(*count.borrow(), 1);
}

/// Malformed frames are counted and dropped without reaching listeners
#[test]
fn test_malformed_frames_dropped() {
    let mut s = session();
    let _rx = s.connect(None);
    let id = current_socket(&s);
    s.on_open(id);

    s.on_binary(id, &Bytes::new());
    s.on_binary(id, &Bytes::from_static(&[0x09, 1, 2, 3]));
    s.on_binary(id, &Bytes::from_static(&[0x02, 0, 1, 2]));
    s.on_binary(id, &Bytes::from_static(&[0x01, b'{']));
    assert_eq!(s.stats().frames_received, 4);
    assert_eq!(s.stats().frames_dropped, 4);
    assert_eq!(s.stats().events_dispatched, 0);
}

/// Frames from a replaced socket are ignored
#[test]
fn test_stale_socket_ignored() {
    let mut s = session();
    let seen = Rc::new(RefCell::new(0));
    {
        let seen = seen.clone();
        s.bus().on(EventKind::AudioLevel, move |_| *seen.borrow_mut() += 1);
    }
    let _first = s.connect(None);
    let old = current_socket(&s);
    let _second = s.connect(Some("ws://other:3000/ws"));
    let new = current_socket(&s);
    assert_ne!(old, new);
    assert_eq!(s.factory().closed, vec![old]);

    s.on_binary(old, &encode::audio_level(&CAM, 0.0));
    s.on_close(old);
    assert_eq!(*seen.borrow(), 0);
    assert_eq!(s.state(), SessionState::Connecting);
    assert!(s.scheduler().scheduled.is_empty());
}

/// Backoff doubles up to the ceiling and resets after a successful open
#[test]
fn test_backoff_schedule() {
    let mut s = session();
    let mut rx = s.connect(None);
    let expected = [1000u64, 2000, 4000, 8000, 16000, 16000];

    for _ in expected {
        let id = current_socket(&s);
        s.on_error(id);
        s.on_close(id);
        let (timer, _) = *s.scheduler().scheduled.last().unwrap();
        s.on_timer(timer);
    }
    let delays: Vec<u64> = s
        .scheduler()
        .scheduled
        .iter()
        .map(|(_, d)| d.as_millis() as u64)
        .collect();
    assert_eq!(delays, expected);
    assert_eq!(
        rx.try_recv().unwrap(),
        Err(ConnectionError::Failed {
            url: "ws://localhost:3000/ws".to_string()
        })
    );

    let id = current_socket(&s);
    s.on_open(id);
    assert_eq!(s.backoff(), Duration::from_millis(1000));
    assert_eq!(s.stats().reconnect_attempts, 6);
}
