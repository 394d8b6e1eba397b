//! Session thread
//!
//! The session, its event bus and every listener live on one dedicated
//! thread running a current-thread tokio runtime. Other threads talk to it
//! through [`SessionHandle`], which sends commands and awaits replies.

use crate::timer::TokioScheduler;
use crate::ws::WsSocketFactory;
use bytes::Bytes;
use kodama_client_core::{
    ConnectionError, EventBus, Scheduler, Session, SessionConfig, SessionState, SessionStats,
    SocketFactory, SocketId, TimerId,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// What a socket task observed
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Error(String),
    Closed,
    Binary(Bytes),
    Text(String),
}

/// Input to the session from its socket tasks and timers
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Socket(SocketId, SocketEvent),
    Timer(TimerId),
}

/// Feed one driver event into the session
pub fn apply<F: SocketFactory, T: Scheduler>(session: &mut Session<F, T>, event: DriverEvent) {
    match event {
        DriverEvent::Socket(id, SocketEvent::Open) => session.on_open(id),
        DriverEvent::Socket(id, SocketEvent::Error(e)) => {
            tracing::debug!(socket = id.0, error = %e, "Socket error");
            session.on_error(id);
        }
        DriverEvent::Socket(id, SocketEvent::Closed) => session.on_close(id),
        DriverEvent::Socket(id, SocketEvent::Binary(frame)) => session.on_binary(id, &frame),
        DriverEvent::Socket(id, SocketEvent::Text(text)) => session.on_text(id, &text),
        DriverEvent::Timer(id) => session.on_timer(id),
    }
}

/// Commands sent to the session thread
pub enum SessionCommand {
    Connect {
        url: Option<String>,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    GetStatus {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

/// Session status snapshot (safe to send between threads)
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub backoff: Duration,
    pub stats: SessionStats,
}

/// Handle to communicate with the session thread
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Spawn the session on a dedicated thread and return a handle.
    ///
    /// `setup` runs on the session thread before any command is handled and
    /// registers the listeners. Listeners need not be `Send`, so resources
    /// such as audio output streams can be created inside `setup`.
    pub fn spawn<S>(config: SessionConfig, setup: S) -> anyhow::Result<Self>
    where
        S: FnOnce(&EventBus) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<SessionCommand>(32);

        std::thread::Builder::new()
            .name("kodama-session".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to build session runtime");
                        return;
                    }
                };
                runtime.block_on(run_session(config, setup, rx));
                tracing::debug!("Session thread exited");
            })?;

        Ok(Self { tx })
    }

    /// Connect and wait until the socket opens or fails
    pub async fn connect(&self, url: Option<String>) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Connect { url, reply })
            .await
            .map_err(|_| ConnectionError::SessionClosed)?;
        rx.await.map_err(|_| ConnectionError::SessionClosed)?
    }

    /// Close the socket and stop reconnecting
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Disconnect { reply })
            .await
            .map_err(|_| anyhow::anyhow!("Session thread died"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Session thread died"))
    }

    pub async fn status(&self) -> anyhow::Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetStatus { reply })
            .await
            .map_err(|_| anyhow::anyhow!("Session thread died"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Session thread died"))
    }

    /// Stop the session thread; its socket is closed
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SessionCommand::Shutdown).await;
    }

    /// Whether the session thread is still accepting commands
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn run_session<S>(config: SessionConfig, setup: S, mut commands: mpsc::Receiver<SessionCommand>)
where
    S: FnOnce(&EventBus),
{
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = Session::new(
        config,
        WsSocketFactory::new(events_tx.clone()),
        TokioScheduler::new(events_tx),
    );
    setup(session.bus());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Connect { url, reply }) => {
                    let result = session.connect(url.as_deref());
                    tokio::spawn(async move {
                        let outcome = result.await.unwrap_or(Err(ConnectionError::SessionClosed));
                        let _ = reply.send(outcome);
                    });
                }
                Some(SessionCommand::Disconnect { reply }) => {
                    session.disconnect();
                    let _ = reply.send(());
                }
                Some(SessionCommand::GetStatus { reply }) => {
                    let _ = reply.send(SessionStatus {
                        state: session.state(),
                        url: session.url().map(str::to_string),
                        base_url: session.base_url().map(str::to_string),
                        backoff: session.backoff(),
                        stats: session.stats().clone(),
                    });
                }
                Some(SessionCommand::Shutdown) | None => break,
            },
            Some(event) = events.recv() => apply(&mut session, event),
        }
    }

    session.disconnect();
    // Let socket tasks flush their close frames before the runtime drops
    tokio::time::sleep(Duration::from_millis(50)).await;
}
