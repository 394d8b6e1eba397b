//! Kodama Client - live camera feed client
//!
//! Entry point for the command line client.

use anyhow::Result;
use kodama_client::app;
use kodama_client::{ApiClient, ClientConfig, SessionHandle, SessionState, SessionStatus};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Options given on the command line, applied over the loaded config
#[derive(Default)]
struct CliOptions {
    url: Option<String>,
    origin: Option<String>,
    record_dir: Option<PathBuf>,
    camera: Option<String>,
    no_audio: bool,
    config_path: Option<PathBuf>,
    save_config: bool,
    list_cameras: bool,
}

impl CliOptions {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.url {
            config.server_url = Some(url.clone());
        }
        if let Some(origin) = &self.origin {
            config.origin = Some(origin.clone());
        }
        if let Some(dir) = &self.record_dir {
            config.video.record_dir = Some(dir.clone());
        }
        if let Some(camera) = &self.camera {
            config.camera = Some(camera.clone());
        }
        if self.no_audio {
            config.audio.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kodama_client=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("kodama-client {}", kodama_client::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--no-audio" => options.no_audio = true,
            "--save-config" => options.save_config = true,
            "--cameras" => options.list_cameras = true,
            flag @ ("--url" | "-u" | "--origin" | "--record" | "-r" | "--camera" | "-c"
            | "--config") => {
                let Some(value) = args.get(i + 1).cloned() else {
                    eprintln!("Error: {} requires a value", flag);
                    return Ok(());
                };
                match flag {
                    "--url" | "-u" => options.url = Some(value),
                    "--origin" => options.origin = Some(value),
                    "--record" | "-r" => options.record_dir = Some(PathBuf::from(value)),
                    "--camera" | "-c" => options.camera = Some(value),
                    _ => options.config_path = Some(PathBuf::from(value)),
                }
                i += 2;
                continue;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
            _ => {
                // Positional argument - treat as server URL if not set
                if options.url.is_none() {
                    options.url = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    let config_path = options.config_path.clone().unwrap_or_else(ClientConfig::path);
    let mut config = ClientConfig::load_from(&config_path);
    config.apply_env();
    options.apply(&mut config);

    if options.save_config {
        config.save(&config_path)?;
        println!("Config saved to {}", config_path.display());
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    if options.list_cameras {
        return runtime.block_on(list_cameras(&config));
    }

    run(&runtime, config)
}

fn print_help() {
    println!("Usage: kodama-client [OPTIONS] [URL]");
    println!();
    println!("Options:");
    println!("  -u, --url URL        WebSocket URL (default: ws://localhost:3000/ws)");
    println!("      --origin URL     Derive the WebSocket URL from an http(s) origin");
    println!("  -r, --record DIR     Record each camera to DIR as fMP4");
    println!("  -c, --camera ID      Only record and play this camera");
    println!("      --no-audio       Do not play audio");
    println!("      --config PATH    Config file (default: {})", ClientConfig::path().display());
    println!("      --save-config    Write the effective config and exit");
    println!("      --cameras        List the server's cameras and exit");
    println!("  -v, --version        Show version");
    println!("  -h, --help           Show this help");
    println!();
    println!("Environment:");
    println!("  KODAMA_URL           Overrides the configured WebSocket URL");
    println!("  RUST_LOG             Log filter, e.g. kodama_client=debug");
}

async fn list_cameras(config: &ClientConfig) -> Result<()> {
    let (_, base_url) = kodama_client::session::resolve_urls(
        config.server_url.as_deref(),
        config.origin.as_deref(),
    );
    let api = ApiClient::new(&base_url)?;
    let cameras = api.list_cameras().await?;
    if cameras.is_empty() {
        println!("No cameras.");
    }
    for camera in cameras {
        let state = if camera.connected { "online" } else { "offline" };
        println!("  {}  {:<24} {}", camera.id, camera.name, state);
    }
    Ok(())
}

fn run(runtime: &tokio::runtime::Runtime, config: ClientConfig) -> Result<()> {
    let listeners = config.clone();
    let handle = SessionHandle::spawn(config.session_config(), move |bus| {
        app::install(bus, &listeners);
    })?;

    match runtime.block_on(handle.connect(config.server_url.clone())) {
        Ok(()) => info!("Connected"),
        Err(e) => warn!("Initial connection failed: {} (retrying in background)", e),
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    println!("Streaming. Press Ctrl+C to stop.");
    println!();

    let mut last_status = String::new();
    while running.load(Ordering::SeqCst) {
        match runtime.block_on(handle.status()) {
            Ok(status) => {
                let line = status_line(&status);
                // Only print if changed (reduce spam)
                if line != last_status {
                    println!("{}", line);
                    last_status = line;
                }
            }
            Err(e) => {
                error!("{}", e);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    println!();
    println!("Stopping...");
    runtime.block_on(handle.shutdown());
    // Give the session thread time to close the socket
    std::thread::sleep(Duration::from_millis(100));
    println!("Done.");
    Ok(())
}

fn status_line(status: &SessionStatus) -> String {
    let state = match status.state {
        SessionState::Idle => "IDLE",
        SessionState::Connecting => "CONNECTING",
        SessionState::Open => "OPEN",
        SessionState::Closed => "RETRYING",
    };
    let mut line = format!(
        "{:<10} | Frames: {:>8} | Dropped: {:>5} | Events: {:>8} | Reconnects: {:>3}",
        state,
        status.stats.frames_received,
        status.stats.frames_dropped,
        status.stats.events_dispatched,
        status.stats.reconnect_attempts,
    );
    if status.state == SessionState::Closed {
        line.push_str(&format!(" | Backoff: {}ms", status.backoff.as_millis()));
    }
    line
}
