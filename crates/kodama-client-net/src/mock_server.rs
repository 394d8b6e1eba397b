//! Standalone mock feed server
//!
//! Serves a synthetic camera feed for manual testing of the client.
//! Environment: `PORT` (default 3000), `CAMERAS` (default 2).

use kodama_client_net::mock_feed::{spawn_server, MockFeedConfig, MockFeedState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kodama_client_net=debug".parse().unwrap()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000u16);
    let cameras = std::env::var("CAMERAS")
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(2u8);

    let config = MockFeedConfig {
        port,
        cameras,
        ..Default::default()
    };
    tracing::info!(port, cameras, "Mock feed server starting");

    match spawn_server(MockFeedState::new(config)).await {
        Ok((_, task)) => {
            let _ = task.await;
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
    }
}
