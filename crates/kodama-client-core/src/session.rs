//! Reconnecting socket session
//!
//! [`Session`] is a sans-IO state machine. It asks a [`SocketFactory`] to
//! open and close sockets and a [`Scheduler`] to arm and cancel reconnect
//! timers; the I/O layer feeds the outcome back through the `on_*` methods.
//!
//! Every socket and timer carries a generation id. Callbacks for ids that are
//! no longer current are ignored, which is how a socket closed by
//! [`Session::disconnect`] or replaced by [`Session::connect`] is kept from
//! scheduling another reconnect.
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed -> (backoff) -> Connecting -> ...
//!   ^__________________ disconnect() from any state _______________|
//! ```

use crate::bus::EventBus;
use crate::error::ConnectionError;
use crate::protocol::event::{Event, VideoInitEvent};
use crate::protocol::{decode_frame, parse_envelope};
use crate::stats::SessionStats;
use crate::{DEFAULT_WS_URL, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// REST base URL paired with [`DEFAULT_WS_URL`]
const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Generation id of one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

/// Generation id of one reconnect timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Opens and closes sockets on behalf of the session
///
/// `open` must not call back into the session synchronously. Every opened
/// socket eventually reports either open or close (an error is always
/// followed by a close), unless the session closes it first.
pub trait SocketFactory {
    fn open(&mut self, id: SocketId, url: &str);
    fn close(&mut self, id: SocketId);
}

/// One-shot timers for reconnection
pub trait Scheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration);
    fn cancel(&mut self, id: TimerId);
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// First reconnect delay, restored after every successful open
    pub initial_backoff: Duration,
    /// Reconnect delay ceiling
    pub max_backoff: Duration,
    /// Page origin (`http[s]://host[:port]`) used to derive the socket URL
    /// when `connect` is called without one
    pub origin: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            origin: None,
        }
    }
}

type ConnectReply = oneshot::Sender<Result<(), ConnectionError>>;

/// Owns at most one live socket and turns its traffic into bus events
pub struct Session<F: SocketFactory, T: Scheduler> {
    config: SessionConfig,
    factory: F,
    scheduler: T,
    bus: EventBus,
    state: SessionState,
    backoff: Duration,
    url: Option<String>,
    base_url: Option<String>,
    socket: Option<SocketId>,
    next_socket: u64,
    timer: Option<TimerId>,
    next_timer: u64,
    pending: Option<ConnectReply>,
    video_inits: HashMap<String, VideoInitEvent>,
    stats: SessionStats,
}

impl<F: SocketFactory, T: Scheduler> Session<F, T> {
    pub fn new(config: SessionConfig, factory: F, scheduler: T) -> Self {
        let backoff = config.initial_backoff;
        Self {
            config,
            factory,
            scheduler,
            bus: EventBus::new(),
            state: SessionState::Idle,
            backoff,
            url: None,
            base_url: None,
            socket: None,
            next_socket: 0,
            timer: None,
            next_timer: 0,
            pending: None,
            video_inits: HashMap::new(),
            stats: SessionStats::new(),
        }
    }

    /// Open a new socket, replacing any existing one.
    ///
    /// The returned receiver resolves once the socket opens, or with
    /// [`ConnectionError::Failed`] if it fails before opening. A connect that
    /// is still pending when another `connect` or `disconnect` arrives is
    /// failed with [`ConnectionError::Superseded`] or
    /// [`ConnectionError::Disconnected`].
    pub fn connect(&mut self, url: Option<&str>) -> oneshot::Receiver<Result<(), ConnectionError>> {
        self.cancel_timer();
        self.detach_socket();
        if let Some(previous) = self.pending.take() {
            let _ = previous.send(Err(ConnectionError::Superseded));
        }

        let (ws_url, base_url) = resolve_urls(url, self.config.origin.as_deref());
        tracing::info!(url = %ws_url, "Connecting");
        self.url = Some(ws_url);
        self.base_url = Some(base_url);

        let (tx, rx) = oneshot::channel();
        self.pending = Some(tx);
        self.open_socket();
        rx
    }

    /// Close the socket and stop reconnecting until the next `connect`.
    pub fn disconnect(&mut self) {
        self.cancel_timer();
        self.detach_socket();
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(Err(ConnectionError::Disconnected));
        }
        if self.state != SessionState::Idle {
            tracing::info!("Disconnected");
        }
        self.state = SessionState::Idle;
        self.backoff = self.config.initial_backoff;
    }

    /// The socket finished its handshake
    pub fn on_open(&mut self, id: SocketId) {
        if !self.is_current(id) {
            return;
        }
        self.state = SessionState::Open;
        self.backoff = self.config.initial_backoff;
        self.stats.record_open();
        tracing::info!(url = self.url.as_deref().unwrap_or(""), "Connected");
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(Ok(()));
        }
    }

    /// The socket reported an error; a close follows
    pub fn on_error(&mut self, id: SocketId) {
        if !self.is_current(id) {
            return;
        }
        tracing::warn!(socket = id.0, state = ?self.state, "Socket error");
        if self.state != SessionState::Open {
            self.fail_pending();
        }
    }

    /// The socket closed for any reason other than `disconnect`
    pub fn on_close(&mut self, id: SocketId) {
        if !self.is_current(id) {
            return;
        }
        let was_open = self.state == SessionState::Open;
        self.socket = None;
        self.state = SessionState::Closed;
        self.fail_pending();

        let delay = self.backoff;
        self.schedule_reconnect();
        if was_open {
            self.stats.record_disconnection(delay.as_millis() as u64);
        }
        tracing::warn!(
            retry_in_ms = delay.as_millis() as u64,
            was_open,
            "Connection closed, reconnect scheduled"
        );
    }

    /// A reconnect timer fired
    pub fn on_timer(&mut self, id: TimerId) {
        if self.timer != Some(id) {
            return;
        }
        self.timer = None;
        if self.url.is_none() {
            return;
        }
        self.stats.reconnect_attempts += 1;
        tracing::debug!(attempt = self.stats.reconnect_attempts, "Reconnecting");
        self.open_socket();
    }

    /// A binary message arrived
    pub fn on_binary(&mut self, id: SocketId, frame: &Bytes) {
        if !self.is_current(id) {
            return;
        }
        self.stats.frames_received += 1;
        let events = decode_frame(frame);
        if events.is_empty() {
            self.stats.frames_dropped += 1;
        }
        for event in events {
            self.dispatch(event);
        }
    }

    /// A text message arrived
    pub fn on_text(&mut self, id: SocketId, text: &str) {
        if !self.is_current(id) {
            return;
        }
        self.stats.frames_received += 1;
        match parse_envelope(text) {
            Some(event) => self.dispatch(event),
            None => {
                self.stats.frames_dropped += 1;
                tracing::trace!(len = text.len(), "Ignored text message");
            }
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Delay the next reconnect will wait
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Socket URL of the last `connect`
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// HTTP base URL for REST calls, derived alongside the socket URL
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Most recent video init seen for `source_id`
    pub fn last_video_init(&self, source_id: &str) -> Option<&VideoInitEvent> {
        self.video_inits.get(source_id)
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    pub fn scheduler(&self) -> &T {
        &self.scheduler
    }

    fn is_current(&self, id: SocketId) -> bool {
        self.socket == Some(id)
    }

    fn dispatch(&mut self, event: Event) {
        if let Event::VideoInit(init) = &event {
            self.video_inits.insert(init.source_id.clone(), init.clone());
        }
        let failures = self.bus.emit(&event);
        self.stats.events_dispatched += 1;
        self.stats.listener_failures += failures as u64;
    }

    fn open_socket(&mut self) {
        let Some(url) = self.url.as_deref() else {
            return;
        };
        let id = SocketId(self.next_socket);
        self.next_socket += 1;
        self.socket = Some(id);
        self.state = SessionState::Connecting;
        self.factory.open(id, url);
    }

    fn detach_socket(&mut self) {
        if let Some(id) = self.socket.take() {
            self.factory.close(id);
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(id) = self.timer.take() {
            self.scheduler.cancel(id);
        }
    }

    fn fail_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            let url = self.url.clone().unwrap_or_default();
            let _ = pending.send(Err(ConnectionError::Failed { url }));
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.scheduler.schedule(id, self.backoff);
        self.timer = Some(id);
        self.backoff = (self.backoff * 2).min(self.config.max_backoff);
    }
}

/// Resolve the socket URL and the REST base URL.
///
/// An explicit URL wins; otherwise an `http`/`https` origin maps to
/// `ws`/`wss` with path `/ws`; anything else falls back to the local default.
pub fn resolve_urls(url: Option<&str>, origin: Option<&str>) -> (String, String) {
    if let Some(url) = url {
        return (url.to_string(), base_url_for(url));
    }
    if let Some(origin) = origin.map(|o| o.trim_end_matches('/')) {
        if let Some(host) = origin.strip_prefix("https://") {
            return (format!("wss://{host}/ws"), origin.to_string());
        }
        if let Some(host) = origin.strip_prefix("http://") {
            return (format!("ws://{host}/ws"), origin.to_string());
        }
    }
    (DEFAULT_WS_URL.to_string(), DEFAULT_BASE_URL.to_string())
}

fn base_url_for(ws_url: &str) -> String {
    let http = match ws_url.strip_prefix("ws") {
        Some(rest) => format!("http{rest}"),
        None => ws_url.to_string(),
    };
    let trimmed = http.strip_suffix('/').unwrap_or(&http);
    trimmed.strip_suffix("/ws").unwrap_or(trimmed).to_string()
}
