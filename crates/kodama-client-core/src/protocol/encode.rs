//! Binary frame encoder, the inverse of [`super::decode`]
//!
//! Used by the mock feed server and by tests to produce frames exactly as a
//! Kodama server broadcasts them.

use super::event::CameraInfo;
use super::{MessageKind, SourceId};
use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

fn with_source(kind: MessageKind, source: &SourceId, body_len: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + source.0.len() + body_len);
    buf.put_u8(kind as u8);
    buf.put_slice(source.as_bytes());
    buf
}

/// `0x01` + JSON array of cameras
pub fn camera_list(cameras: &[CameraInfo]) -> serde_json::Result<Bytes> {
    let json = serde_json::to_vec(cameras)?;
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(MessageKind::CameraList as u8);
    buf.put_slice(&json);
    Ok(buf.freeze())
}

/// `0x02` + source + codec_len + codec + width + height + init segment
pub fn video_init(
    source: &SourceId,
    codec: &str,
    width: u16,
    height: u16,
    init_segment: &[u8],
) -> Result<Bytes, ProtocolError> {
    let codec_len =
        u8::try_from(codec.len()).map_err(|_| ProtocolError::CodecTooLong(codec.len()))?;
    let mut buf = with_source(
        MessageKind::VideoInit,
        source,
        1 + codec.len() + 4 + init_segment.len(),
    );
    buf.put_u8(codec_len);
    buf.put_slice(codec.as_bytes());
    buf.put_u16_le(width);
    buf.put_u16_le(height);
    buf.put_slice(init_segment);
    Ok(buf.freeze())
}

/// `0x03` + source + media segment
pub fn video_segment(source: &SourceId, segment: &[u8]) -> Bytes {
    let mut buf = with_source(MessageKind::VideoSegment, source, segment.len());
    buf.put_slice(segment);
    buf.freeze()
}

/// `0x04` + source + JSON telemetry object
pub fn telemetry<T: serde::Serialize>(source: &SourceId, data: &T) -> serde_json::Result<Bytes> {
    let json = serde_json::to_vec(data)?;
    let mut buf = with_source(MessageKind::Telemetry, source, json.len());
    buf.put_slice(&json);
    Ok(buf.freeze())
}

/// `0x05` + source + f32 level in dB
pub fn audio_level(source: &SourceId, level_db: f32) -> Bytes {
    let mut buf = with_source(MessageKind::AudioLevel, source, 4);
    buf.put_f32_le(level_db);
    buf.freeze()
}

/// `0x06` + source + sample rate + channels + s16le PCM
pub fn audio_data(source: &SourceId, sample_rate: u32, channels: u8, pcm: &[u8]) -> Bytes {
    let mut buf = with_source(MessageKind::AudioData, source, 5 + pcm.len());
    buf.put_u32_le(sample_rate);
    buf.put_u8(channels);
    buf.put_slice(pcm);
    buf.freeze()
}

/// Pack samples as signed 16-bit little-endian PCM
pub fn pcm_s16le(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}
