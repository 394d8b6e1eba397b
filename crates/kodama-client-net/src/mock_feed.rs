//! Mock Kodama feed server
//!
//! Serves `/ws` with a synthetic multi-camera feed in the binary protocol,
//! plus `/api/cameras` and `/api/status`. Used by the e2e tests and the
//! `mock-server` binary.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use kodama_client_core::protocol::encode;
use kodama_client_core::protocol::envelope::to_envelope;
use kodama_client_core::protocol::event::{
    CameraEvent, CameraInfo, Event, GpsData, ServerStatus, TelemetryData,
};
use kodama_client_core::SourceId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Codec advertised for synthetic video
pub const MOCK_CODEC: &str = "avc1.42e01e";

/// Mock server configuration
#[derive(Clone, Debug)]
pub struct MockFeedConfig {
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
    /// Number of synthetic cameras
    pub cameras: u8,
    /// Time between media ticks
    pub tick: Duration,
    pub sample_rate: u32,
    pub channels: u8,
    /// Close each connection after this many ticks
    pub close_after_ticks: Option<u64>,
}

impl Default for MockFeedConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_addr: "127.0.0.1".to_string(),
            cameras: 2,
            tick: Duration::from_millis(100),
            sample_rate: 48000,
            channels: 1,
            close_after_ticks: None,
        }
    }
}

/// Shared state of the mock server
#[derive(Clone)]
pub struct MockFeedState {
    pub config: Arc<MockFeedConfig>,
    clients: Arc<AtomicU64>,
    connections: Arc<AtomicU64>,
    frames_broadcast: Arc<AtomicU64>,
    started: Instant,
}

impl MockFeedState {
    pub fn new(config: MockFeedConfig) -> Self {
        Self {
            config: Arc::new(config),
            clients: Arc::new(AtomicU64::new(0)),
            connections: Arc::new(AtomicU64::new(0)),
            frames_broadcast: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    /// WebSocket connections accepted so far
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn frames_broadcast(&self) -> u64 {
        self.frames_broadcast.load(Ordering::Relaxed)
    }

    fn cameras(&self) -> Vec<CameraInfo> {
        (0..self.config.cameras)
            .map(|i| CameraInfo {
                id: camera_source(i).to_hex(),
                name: format!("Camera {}", i + 1),
                connected: true,
            })
            .collect()
    }
}

/// Source id of synthetic camera `index`
pub fn camera_source(index: u8) -> SourceId {
    SourceId([0x4b, 0x4f, 0x44, 0x41, 0, 0, 0, index + 1])
}

/// Build the Axum router with all routes
pub fn build_router(state: MockFeedState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/api/cameras", axum::routing::get(list_cameras))
        .route("/api/status", axum::routing::get(get_status))
        .with_state(state)
}

/// Bind and serve until the task is dropped; returns the bound address
pub async fn spawn_server(
    state: MockFeedState,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    let app = build_router(state);
    tracing::info!(addr = %local, "Mock feed server listening");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Mock feed server error: {}", e);
        }
    });
    Ok((local, task))
}

async fn list_cameras(State(state): State<MockFeedState>) -> Json<Vec<CameraInfo>> {
    Json(state.cameras())
}

async fn get_status(State(state): State<MockFeedState>) -> Json<ServerStatus> {
    Json(ServerStatus {
        cameras: state.config.cameras as u64,
        clients: state.clients.load(Ordering::Relaxed),
        uptime_secs: state.started.elapsed().as_secs(),
        frames_received: state.frames_broadcast(),
        frames_broadcast: state.frames_broadcast(),
        public_key: None,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<MockFeedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: MockFeedState) {
    state.connections.fetch_add(1, Ordering::Relaxed);
    state.clients.fetch_add(1, Ordering::Relaxed);
    let (mut sender, mut receiver) = socket.split();

    let mut feed = SyntheticFeed::new(&state.config);
    let mut send_task = {
        let state = state.clone();
        tokio::spawn(async move {
            for frame in feed.preamble(&state) {
                if sender.send(frame).await.is_err() {
                    return;
                }
                state.frames_broadcast.fetch_add(1, Ordering::Relaxed);
            }

            let mut interval = tokio::time::interval(state.config.tick);
            let mut ticks = 0u64;
            loop {
                interval.tick().await;
                if state.config.close_after_ticks.is_some_and(|limit| ticks >= limit) {
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
                for frame in feed.tick() {
                    if sender.send(Message::Binary(frame)).await.is_err() {
                        return;
                    }
                    state.frames_broadcast.fetch_add(1, Ordering::Relaxed);
                }
                ticks += 1;
            }
        })
    };

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }
    state.clients.fetch_sub(1, Ordering::Relaxed);
}

/// Frame generator for one connection
struct SyntheticFeed {
    cameras: Vec<SourceId>,
    sample_rate: u32,
    channels: u8,
    samples_per_tick: usize,
    phase: f64,
    segment: u64,
}

impl SyntheticFeed {
    fn new(config: &MockFeedConfig) -> Self {
        let samples_per_tick =
            (config.sample_rate as f64 * config.tick.as_secs_f64()).round() as usize;
        Self {
            cameras: (0..config.cameras).map(camera_source).collect(),
            sample_rate: config.sample_rate,
            channels: config.channels.max(1),
            samples_per_tick,
            phase: 0.0,
            segment: 0,
        }
    }

    /// Camera list, a text-envelope presence event and one init per camera
    fn preamble(&self, state: &MockFeedState) -> Vec<Message> {
        let mut frames = Vec::new();
        match encode::camera_list(&state.cameras()) {
            Ok(frame) => frames.push(Message::Binary(frame)),
            Err(e) => tracing::error!("Failed to encode camera list: {}", e),
        }
        if let Some(first) = self.cameras.first() {
            let event = Event::Camera(CameraEvent {
                source_id: first.to_hex(),
                connected: true,
            });
            if let Ok(text) = to_envelope(&event) {
                frames.push(Message::Text(text.into()));
            }
        }
        for source in &self.cameras {
            let init = format!("ftypmoov:{}", source.to_hex());
            match encode::video_init(source, MOCK_CODEC, 640, 480, init.as_bytes()) {
                Ok(frame) => frames.push(Message::Binary(frame)),
                Err(e) => tracing::error!("Failed to encode video init: {}", e),
            }
        }
        frames
    }

    /// One media tick: segment, audio level and audio data per camera,
    /// telemetry every tenth tick
    fn tick(&mut self) -> Vec<Bytes> {
        let pcm = self.sine_chunk();
        let level_db = -12.0 + (self.segment % 6) as f32;
        let mut frames = Vec::with_capacity(self.cameras.len() * 4);

        for source in &self.cameras {
            let segment = format!("moofmdat:{}:{}", source.to_hex(), self.segment);
            frames.push(encode::video_segment(source, segment.as_bytes()));
            frames.push(encode::audio_level(source, level_db));
            frames.push(encode::audio_data(source, self.sample_rate, self.channels, &pcm));
            if self.segment % 10 == 0 {
                let telemetry = TelemetryData {
                    cpu_usage: 12.5,
                    cpu_temp: Some(48.0),
                    memory_usage: 41.0,
                    disk_usage: 63.0,
                    uptime_secs: self.segment / 10,
                    load_average: [0.4, 0.3, 0.2],
                    gps: Some(GpsData {
                        latitude: 35.6812,
                        longitude: 139.7671,
                        fix_mode: 3,
                        ..Default::default()
                    }),
                    motion_level: Some(0.1),
                };
                if let Ok(frame) = encode::telemetry(source, &telemetry) {
                    frames.push(frame);
                }
            }
        }
        self.segment += 1;
        frames
    }

    /// 440 Hz tone, continuous across ticks
    fn sine_chunk(&mut self) -> Bytes {
        let step = 2.0 * std::f64::consts::PI * 440.0 / self.sample_rate as f64;
        let mut samples = Vec::with_capacity(self.samples_per_tick * self.channels as usize);
        for _ in 0..self.samples_per_tick {
            let value = (self.phase.sin() * 0.25 * i16::MAX as f64) as i16;
            self.phase = (self.phase + step) % (2.0 * std::f64::consts::PI);
            for _ in 0..self.channels {
                samples.push(value);
            }
        }
        encode::pcm_s16le(&samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kodama_client_core::protocol::decode_frame;
    use kodama_client_core::EventKind;

    #[test]
    fn test_camera_sources_distinct() {
        assert_ne!(camera_source(0), camera_source(1));
        assert_eq!(camera_source(0).to_hex(), "4b4f444100000001");
    }

    #[test]
    fn test_tick_frames_decode() {
        let config = MockFeedConfig {
            cameras: 2,
            ..Default::default()
        };
        let mut feed = SyntheticFeed::new(&config);
        let kinds: Vec<EventKind> = feed
            .tick()
            .iter()
            .flat_map(decode_frame)
            .map(|e| e.kind())
            .collect();
        // First tick carries telemetry for both cameras
        assert_eq!(kinds.len(), 8);
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::Telemetry).count(),
            2
        );

        let second = feed.tick();
        assert_eq!(second.len(), 6);
    }

    #[test]
    fn test_sine_chunk_size() {
        let config = MockFeedConfig {
            channels: 2,
            ..Default::default()
        };
        let mut feed = SyntheticFeed::new(&config);
        // 100 ms at 48 kHz stereo, two bytes per sample
        assert_eq!(feed.sine_chunk().len(), 4800 * 2 * 2);
    }
}
