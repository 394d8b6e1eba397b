//! Kodama Client Core - transport and media buffering for live camera feeds
//!
//! This library contains everything between the socket and the media sinks
//! that does not perform I/O itself:
//! - Binary frame decoding and encoding ([`protocol`])
//! - Per-kind event fan-out ([`bus`])
//! - The reconnecting session state machine ([`session`])
//! - The lock-free PCM ring buffer ([`audio`])
//! - Live video segment backpressure ([`video`])
//!
//! Sockets, timers and media sinks are injected through traits so the whole
//! core runs under test without a network or a clock.

pub mod audio;
pub mod bus;
pub mod error;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod video;

pub use audio::ring::{pcm_ring, PcmRenderer, PcmWriter};
pub use audio::AudioRouter;
pub use bus::{EventBus, Subscription};
pub use error::{ConnectionError, ProtocolError, SinkError};
pub use protocol::event::{Event, EventKind};
pub use protocol::SourceId;
pub use session::{Scheduler, Session, SessionConfig, SessionState, SocketFactory, SocketId, TimerId};
pub use stats::SessionStats;
pub use video::queue::{LiveSegmentQueue, SegmentOutcome};
pub use video::{MediaSink, SinkFactory, SinkId, VideoStats};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default WebSocket endpoint when no URL or page origin is known
pub const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";

/// Initial reconnection delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Reconnection delay ceiling in milliseconds
pub const MAX_BACKOFF_MS: u64 = 16000;

/// Maximum number of video segments waiting behind an in-flight append
pub const DEFAULT_SEGMENT_QUEUE_LIMIT: usize = 30;
