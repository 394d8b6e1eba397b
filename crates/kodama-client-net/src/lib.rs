//! Kodama Client Net - tokio adapters for the client core
//!
//! - WebSocket sockets ([`ws`]) and reconnect timers ([`timer`])
//! - The session thread and its handle ([`driver`])
//! - REST calls ([`api`])
//! - A synthetic feed server for tests (`mock_feed`, feature `mock-server`)
//! - Audio output through cpal (`playback`, feature `playback`)

pub mod api;
pub mod driver;
#[cfg(feature = "mock-server")]
pub mod mock_feed;
#[cfg(feature = "playback")]
pub mod playback;
pub mod timer;
pub mod ws;

pub use api::{ApiClient, ApiError};
pub use driver::{DriverEvent, SessionHandle, SessionStatus, SocketEvent};
pub use timer::TokioScheduler;
pub use ws::WsSocketFactory;
