//! Binary frame decoder
//!
//! Pure and total: every length or content violation drops the frame.
//! Minimum lengths are checked before any field past the tag is read, so
//! the fixed-offset reads below cannot go out of bounds.

use super::event::{
    AudioDataEvent, AudioLevelEvent, CameraEvent, CameraInfo, Event, TelemetryData,
    TelemetryEvent, VideoInitEvent, VideoSegmentEvent,
};
use super::{MessageKind, SourceId, SOURCE_BODY_OFFSET};
use crate::error::ProtocolError;
use bytes::Bytes;

/// Decode one binary frame into events.
///
/// Returns an empty vector when the frame is malformed, truncated or of an
/// unknown kind. A camera list frame yields one [`Event::Camera`] per entry.
///
/// # Example
/// ```
/// use bytes::Bytes;
/// use kodama_client_core::protocol::decode_frame;
/// use kodama_client_core::Event;
///
/// let mut frame = vec![0x05, 0, 1, 2, 3, 4, 5, 6, 7];
/// frame.extend_from_slice(&(-12.5f32).to_le_bytes());
/// let events = decode_frame(&Bytes::from(frame));
/// match &events[..] {
///     [Event::AudioLevel(level)] => {
///         assert_eq!(level.source_id, "0001020304050607");
///         assert_eq!(level.level_db, -12.5);
///     }
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
pub fn decode_frame(frame: &Bytes) -> Vec<Event> {
    match parse_frame(frame) {
        Ok(events) => events,
        Err(e @ ProtocolError::InvalidJson { .. }) => {
            tracing::warn!(error = %e, "Dropping frame with unparseable payload");
            Vec::new()
        }
        Err(e) => {
            tracing::trace!(error = %e, "Dropping frame");
            Vec::new()
        }
    }
}

/// Decode one binary frame, naming the reason when it is dropped
pub fn parse_frame(frame: &Bytes) -> Result<Vec<Event>, ProtocolError> {
    let &tag = frame.first().ok_or(ProtocolError::Empty)?;
    let kind = MessageKind::try_from(tag).map_err(ProtocolError::UnknownKind)?;
    ensure_len(frame, kind, kind.min_len())?;

    let event = match kind {
        MessageKind::CameraList => return parse_camera_list(&frame[1..]),
        MessageKind::VideoInit => parse_video_init(frame, read_source_id(frame))?,
        MessageKind::VideoSegment => Event::VideoSegment(VideoSegmentEvent {
            source_id: read_source_id(frame),
            data: frame.slice(SOURCE_BODY_OFFSET..),
        }),
        MessageKind::Telemetry => Event::Telemetry(TelemetryEvent {
            source_id: read_source_id(frame),
            data: parse_telemetry(&frame[SOURCE_BODY_OFFSET..])?,
        }),
        MessageKind::AudioLevel => Event::AudioLevel(AudioLevelEvent {
            source_id: read_source_id(frame),
            level_db: f32::from_le_bytes(le_array(frame, SOURCE_BODY_OFFSET)),
        }),
        MessageKind::AudioData => Event::AudioData(AudioDataEvent {
            source_id: read_source_id(frame),
            sample_rate: u32::from_le_bytes(le_array(frame, SOURCE_BODY_OFFSET)),
            channels: frame[SOURCE_BODY_OFFSET + 4],
            data: frame.slice(SOURCE_BODY_OFFSET + 5..),
        }),
    };

    Ok(vec![event])
}

fn parse_camera_list(json: &[u8]) -> Result<Vec<Event>, ProtocolError> {
    let cameras: Vec<CameraInfo> =
        serde_json::from_slice(json).map_err(|source| ProtocolError::InvalidJson {
            kind: MessageKind::CameraList.name(),
            source,
        })?;

    Ok(cameras
        .into_iter()
        .map(|cam| {
            Event::Camera(CameraEvent {
                source_id: cam.id,
                connected: cam.connected,
            })
        })
        .collect())
}

/// Telemetry must be a JSON object; serde would otherwise fill the struct
/// positionally from an array
fn parse_telemetry(json: &[u8]) -> Result<TelemetryData, ProtocolError> {
    let invalid = |source| ProtocolError::InvalidJson {
        kind: MessageKind::Telemetry.name(),
        source,
    };
    let value: serde_json::Value = serde_json::from_slice(json).map_err(invalid)?;
    if !value.is_object() {
        return Err(invalid(serde::de::Error::custom(
            "telemetry payload is not a JSON object",
        )));
    }
    serde_json::from_value(value).map_err(invalid)
}

fn parse_video_init(frame: &Bytes, source_id: String) -> Result<Event, ProtocolError> {
    let codec_len = frame[SOURCE_BODY_OFFSET] as usize;
    ensure_len(
        frame,
        MessageKind::VideoInit,
        MessageKind::VideoInit.min_len() + codec_len,
    )?;

    let codec_start = SOURCE_BODY_OFFSET + 1;
    let codec = String::from_utf8_lossy(&frame[codec_start..codec_start + codec_len]).into_owned();
    let offset = codec_start + codec_len;

    Ok(Event::VideoInit(VideoInitEvent {
        source_id,
        codec,
        width: u16::from_le_bytes(le_array(frame, offset)),
        height: u16::from_le_bytes(le_array(frame, offset + 2)),
        init_segment: frame.slice(offset + 4..),
    }))
}

fn ensure_len(frame: &[u8], kind: MessageKind, min: usize) -> Result<(), ProtocolError> {
    if frame.len() < min {
        return Err(ProtocolError::Truncated {
            kind: kind.name(),
            len: frame.len(),
            min,
        });
    }
    Ok(())
}

/// Hex source id from bytes 1..9 (length already checked)
fn read_source_id(frame: &[u8]) -> String {
    SourceId::from_slice(&frame[1..])
        .map(|id| id.to_hex())
        .unwrap_or_default()
}

/// Copy `N` bytes at `offset` (length already checked)
fn le_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
