//! WebSocket sockets for the session, backed by tokio-tungstenite
//!
//! Each socket runs in its own task and reports back over the driver's
//! event channel. Closing a socket from the session side sends a close frame
//! and reports nothing further, so the session never sees its own closes.

use crate::driver::{DriverEvent, SocketEvent};
use futures_util::{SinkExt, StreamExt};
use kodama_client_core::{SocketFactory, SocketId};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// [`SocketFactory`] spawning one tokio task per socket
///
/// Must be used from within a tokio runtime.
pub struct WsSocketFactory {
    events: mpsc::UnboundedSender<DriverEvent>,
    shutdown: HashMap<SocketId, oneshot::Sender<()>>,
}

impl WsSocketFactory {
    pub fn new(events: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            events,
            shutdown: HashMap::new(),
        }
    }

    /// Sockets whose task may still be running
    pub fn live_sockets(&self) -> usize {
        self.shutdown.values().filter(|tx| !tx.is_closed()).count()
    }
}

impl SocketFactory for WsSocketFactory {
    fn open(&mut self, id: SocketId, url: &str) {
        self.shutdown.retain(|_, tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        self.shutdown.insert(id, tx);
        tokio::spawn(run_socket(id, url.to_string(), self.events.clone(), rx));
    }

    fn close(&mut self, id: SocketId) {
        if let Some(tx) = self.shutdown.remove(&id) {
            let _ = tx.send(());
        }
    }
}

async fn run_socket(
    id: SocketId,
    url: String,
    events: mpsc::UnboundedSender<DriverEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let report = |event: SocketEvent| {
        let _ = events.send(DriverEvent::Socket(id, event));
    };

    let connected = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
        _ = &mut shutdown => return,
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(socket = id.0, url = %url, error = %e, "WebSocket connect failed");
            report(SocketEvent::Error(e.to_string()));
            report(SocketEvent::Closed);
            return;
        }
    };
    report(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                return;
            }
            message = read.next() => match message {
                Some(Ok(Message::Binary(data))) => report(SocketEvent::Binary(data)),
                Some(Ok(Message::Text(text))) => report(SocketEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) | None => {
                    report(SocketEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(socket = id.0, error = %e, "WebSocket read failed");
                    report(SocketEvent::Error(e.to_string()));
                    report(SocketEvent::Closed);
                    return;
                }
            }
        }
    }
}
