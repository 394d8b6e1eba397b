//! Typed events produced by the decoder and the text envelope

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Event kind, one per subscribable stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Camera,
    VideoInit,
    VideoSegment,
    Telemetry,
    AudioLevel,
    AudioData,
}

impl EventKind {
    /// Every kind, in tag order
    pub const ALL: [EventKind; 6] = [
        EventKind::Camera,
        EventKind::VideoInit,
        EventKind::VideoSegment,
        EventKind::Telemetry,
        EventKind::AudioLevel,
        EventKind::AudioData,
    ];

    /// Name used by the text envelope's `type` field
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::Camera => "camera-event",
            EventKind::VideoInit => "video-init",
            EventKind::VideoSegment => "video-segment",
            EventKind::Telemetry => "telemetry",
            EventKind::AudioLevel => "audio-level",
            EventKind::AudioData => "audio-data",
        }
    }

    /// Look up a kind by its envelope name
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Camera presence change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub source_id: String,
    pub connected: bool,
}

/// Video stream (re)initialization carrying the fMP4 init segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInitEvent {
    pub source_id: String,
    /// RFC 6381 codec string, e.g. `avc1.42e01e`
    pub codec: String,
    pub width: u16,
    pub height: u16,
    pub init_segment: Bytes,
}

impl VideoInitEvent {
    /// MIME type a buffered-media sink is created for
    pub fn mime_type(&self) -> String {
        format!("video/mp4; codecs=\"{}\"", self.codec)
    }
}

/// One fMP4 media segment (moof + mdat)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegmentEvent {
    pub source_id: String,
    pub data: Bytes,
}

/// GPS fix reported by a camera
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub fix_mode: u8,
}

/// Device health fields of a telemetry update
///
/// Absent fields take their zero value so sparse updates still decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryData {
    pub cpu_usage: f64,
    pub cpu_temp: Option<f64>,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub uptime_secs: u64,
    pub load_average: [f64; 3],
    pub gps: Option<GpsData>,
    pub motion_level: Option<f64>,
}

/// Telemetry payload merged with its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub source_id: String,
    #[serde(flatten)]
    pub data: TelemetryData,
}

/// Audio meter reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioLevelEvent {
    pub source_id: String,
    pub level_db: f32,
}

/// Chunk of interleaved signed 16-bit little-endian PCM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDataEvent {
    pub source_id: String,
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Camera entry of the camera list frame and of `GET /api/cameras`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connected: bool,
}

/// Response of `GET /api/status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub cameras: u64,
    pub clients: u64,
    pub uptime_secs: u64,
    pub frames_received: u64,
    pub frames_broadcast: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// A decoded event, one variant per [`EventKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Camera(CameraEvent),
    VideoInit(VideoInitEvent),
    VideoSegment(VideoSegmentEvent),
    Telemetry(TelemetryEvent),
    AudioLevel(AudioLevelEvent),
    AudioData(AudioDataEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Camera(_) => EventKind::Camera,
            Event::VideoInit(_) => EventKind::VideoInit,
            Event::VideoSegment(_) => EventKind::VideoSegment,
            Event::Telemetry(_) => EventKind::Telemetry,
            Event::AudioLevel(_) => EventKind::AudioLevel,
            Event::AudioData(_) => EventKind::AudioData,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Event::Camera(e) => &e.source_id,
            Event::VideoInit(e) => &e.source_id,
            Event::VideoSegment(e) => &e.source_id,
            Event::Telemetry(e) => &e.source_id,
            Event::AudioLevel(e) => &e.source_id,
            Event::AudioData(e) => &e.source_id,
        }
    }

    /// Serialize the event body as envelope payload JSON
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Event::Camera(e) => serde_json::to_value(e),
            Event::VideoInit(e) => serde_json::to_value(e),
            Event::VideoSegment(e) => serde_json::to_value(e),
            Event::Telemetry(e) => serde_json::to_value(e),
            Event::AudioLevel(e) => serde_json::to_value(e),
            Event::AudioData(e) => serde_json::to_value(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire_name(kind.wire_name()), Some(kind));
        }
        assert_eq!(EventKind::from_wire_name("video_init"), None);
    }

    #[test]
    fn test_telemetry_sparse_payload() {
        let data: TelemetryData = serde_json::from_str(r#"{"cpu_usage": 12.5}"#).unwrap();
        assert_eq!(data.cpu_usage, 12.5);
        assert_eq!(data.uptime_secs, 0);
        assert_eq!(data.gps, None);
    }

    #[test]
    fn test_telemetry_event_flattens_source() {
        let json = r#"{"source_id":"abc","cpu_usage":1.0,"uptime_secs":60,"load_average":[1,2,3]}"#;
        let event: TelemetryEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.source_id, "abc");
        assert_eq!(event.data.uptime_secs, 60);
        assert_eq!(event.data.load_average, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mime_type() {
        let event = VideoInitEvent {
            source_id: "cam".to_string(),
            codec: "avc1.42e01e".to_string(),
            width: 640,
            height: 480,
            init_segment: Bytes::new(),
        };
        assert_eq!(event.mime_type(), "video/mp4; codecs=\"avc1.42e01e\"");
    }

    #[test]
    fn test_server_status_optional_key() {
        let json = r#"{"cameras":2,"clients":1,"uptime_secs":5,"frames_received":9,"frames_broadcast":8}"#;
        let status: ServerStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.cameras, 2);
        assert_eq!(status.public_key, None);
    }
}
