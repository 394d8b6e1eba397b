//! Kodama Client - live camera feed client
//!
//! Connects to a Kodama server, keeps the feed alive across disconnects,
//! records each camera to fMP4 and plays one camera's audio.
//!
//! The transport and buffering live in `kodama-client-core` (sans-IO) and
//! `kodama-client-net` (tokio adapters); this crate adds configuration,
//! recording and the listener wiring used by the binary.

pub mod app;
pub mod config;
pub mod record;

pub use kodama_client_core::{audio, bus, protocol, session, stats, video};

pub use config::ClientConfig;
pub use kodama_client_core::{
    ConnectionError, Event, EventBus, EventKind, SessionConfig, SessionState, SourceId, VERSION,
};
pub use kodama_client_net::{ApiClient, ApiError, SessionHandle, SessionStatus};
pub use record::{FileSink, FileSinkFactory};
