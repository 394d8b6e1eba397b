//! Wire protocol for the live feed socket
//!
//! Every binary frame is `[1-byte kind][kind-specific body]`:
//!
//! ```text
//! 0x01 + JSON                                       camera list
//! 0x02 + source(8) + codec_len(1) + codec + width(2) + height(2) + init_segment
//! 0x03 + source(8) + media_segment
//! 0x04 + source(8) + JSON                           telemetry
//! 0x05 + source(8) + level_db(f32)
//! 0x06 + source(8) + sample_rate(4) + channels(1) + pcm_s16le
//! ```
//!
//! Multi-byte fields are little-endian. Text frames carry a JSON envelope
//! handled by [`envelope`].

pub mod decode;
pub mod encode;
pub mod envelope;
pub mod event;

pub use decode::{decode_frame, parse_frame};
pub use envelope::parse_envelope;

/// Length of a source identifier on the wire
pub const SOURCE_ID_LEN: usize = 8;

/// Offset of the first byte after `[kind][source_id]`
pub const SOURCE_BODY_OFFSET: usize = 1 + SOURCE_ID_LEN;

/// Message-kind tag, the first byte of every binary frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    CameraList = 0x01,
    VideoInit = 0x02,
    VideoSegment = 0x03,
    Telemetry = 0x04,
    AudioLevel = 0x05,
    AudioData = 0x06,
}

impl MessageKind {
    /// Minimum total frame length, including the tag byte
    ///
    /// For `VideoInit` this is the fixed part only; the codec length byte
    /// extends it once read.
    pub fn min_len(self) -> usize {
        match self {
            MessageKind::CameraList => 1,
            // tag + source + codec_len + width + height
            MessageKind::VideoInit => SOURCE_BODY_OFFSET + 1 + 2 + 2,
            MessageKind::VideoSegment => SOURCE_BODY_OFFSET,
            MessageKind::Telemetry => SOURCE_BODY_OFFSET,
            MessageKind::AudioLevel => SOURCE_BODY_OFFSET + 4,
            MessageKind::AudioData => SOURCE_BODY_OFFSET + 4 + 1,
        }
    }

    /// Human-readable name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::CameraList => "camera list",
            MessageKind::VideoInit => "video init",
            MessageKind::VideoSegment => "video segment",
            MessageKind::Telemetry => "telemetry",
            MessageKind::AudioLevel => "audio level",
            MessageKind::AudioData => "audio data",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(MessageKind::CameraList),
            0x02 => Ok(MessageKind::VideoInit),
            0x03 => Ok(MessageKind::VideoSegment),
            0x04 => Ok(MessageKind::Telemetry),
            0x05 => Ok(MessageKind::AudioLevel),
            0x06 => Ok(MessageKind::AudioData),
            other => Err(other),
        }
    }
}

/// Identifies a camera in the feed.
///
/// Equality is byte-wise. The lowercase hex form (16 characters, no
/// separators) is only produced at the event boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub [u8; SOURCE_ID_LEN]);

impl SourceId {
    /// Create a new SourceId from raw bytes
    pub fn new(id: [u8; SOURCE_ID_LEN]) -> Self {
        Self(id)
    }

    /// Read an identifier from the first 8 bytes of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(..SOURCE_ID_LEN)?;
        let mut id = [0u8; SOURCE_ID_LEN];
        id.copy_from_slice(head);
        Some(Self(id))
    }

    /// Parse the canonical 16-character hex form
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != SOURCE_ID_LEN * 2 || !hex.is_ascii() {
            return None;
        }
        let mut id = [0u8; SOURCE_ID_LEN];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(id))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SOURCE_ID_LEN] {
        &self.0
    }

    /// Canonical lowercase hex string
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
