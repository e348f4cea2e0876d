//! Broadcast session.
//!
//! A background worker owns the single push connection. Its link is one of
//! idle, connecting (a handshake in flight), open (a live message stream) or
//! waiting (a reconnect timer armed), so there can never be more than one
//! socket or more than one pending reconnect. Song changes and connection
//! state transitions are forwarded to the consumer over an mpsc queue.
//!
//! Transports plug in through [`PushConnector`]; [`WebSocketConnector`] is
//! the production implementation.

use crate::constants::{COMMAND_QUEUE, DEFAULT_REQUEST_TIMEOUT_MS, SESSION_EVENT_QUEUE};
use crate::error::{Error, Result};
use crate::models::{ConnectionState, CurrentSong, StationEvent};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Text frames of one push connection; the stream ends or yields an error
/// when the connection closes
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Opens push connections
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<MessageStream>;
}

/// WebSocket push transport
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    session_token: Option<String>,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            session_token: None,
            handshake_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Give up on a handshake the server never answers
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Send the session cookie with the handshake
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Connector for the push channel of an HTTP client's station
    pub fn from_client(client: &crate::client::SyncClient) -> Result<Self> {
        let connector =
            Self::new(client.ws_url()?).with_handshake_timeout(client.request_timeout());
        Ok(match client.session_token() {
            Some(token) => connector.with_session_token(token),
            None => connector,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self) -> Result<MessageStream> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &self.session_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| Error::transport(format!("Invalid session token: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        debug!("Connecting to push channel: {}", self.url);
        let (socket, _response) = timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| {
                Error::transport(format!(
                    "handshake timed out after {}ms",
                    self.handshake_timeout.as_millis()
                ))
            })??;

        let frames = socket.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => Some(Err(Error::transport(match frame {
                    Some(frame) => format!("closed by server: {} {}", frame.code, frame.reason),
                    None => "closed by server".to_string(),
                }))),
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            }
        });

        Ok(frames.boxed())
    }
}

/// Notifications from the session to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    SongChanged(CurrentSong),
}

#[derive(Debug)]
enum SessionCommand {
    Connect,
    Shutdown,
}

/// Handle to the session worker
pub struct BroadcastSession {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    join_handle: JoinHandle<()>,
}

impl BroadcastSession {
    /// Spawn the worker and start connecting immediately
    pub fn spawn(
        connector: Arc<dyn PushConnector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (command_tx, mut command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);

        let join_handle = tokio::spawn(async move {
            info!("Starting broadcast session");

            let mut worker = SessionWorker {
                connector,
                reconnect_delay,
                events: event_tx,
                state: state_tx,
                link: Link::Idle,
            };
            worker.start_attempt().await;

            loop {
                let step = match &mut worker.link {
                    Link::Idle => Step::Command(command_rx.recv().await),
                    Link::Connecting(attempt) => tokio::select! {
                        cmd = command_rx.recv() => Step::Command(cmd),
                        result = attempt => Step::Handshake(result),
                    },
                    Link::Open(stream) => tokio::select! {
                        cmd = command_rx.recv() => Step::Command(cmd),
                        frame = stream.next() => Step::Frame(frame),
                    },
                    Link::Waiting(timer) => tokio::select! {
                        cmd = command_rx.recv() => Step::Command(cmd),
                        _ = timer.as_mut() => Step::Retry,
                    },
                };

                match step {
                    Step::Command(Some(SessionCommand::Connect)) => worker.on_connect_request().await,
                    Step::Command(Some(SessionCommand::Shutdown)) | Step::Command(None) => break,
                    Step::Handshake(Ok(stream)) => {
                        worker.link = Link::Open(stream);
                        worker.set_state(ConnectionState::Open).await;
                    }
                    Step::Handshake(Err(e)) => {
                        warn!("Push channel handshake failed: {}", e);
                        worker.on_closed().await;
                    }
                    Step::Frame(Some(Ok(text))) => worker.handle_text(&text).await,
                    Step::Frame(Some(Err(e))) => {
                        warn!("Push channel closed: {}", e);
                        worker.on_closed().await;
                    }
                    Step::Frame(None) => {
                        info!("Push channel ended");
                        worker.on_closed().await;
                    }
                    Step::Retry => {
                        debug!("Reconnect timer elapsed");
                        worker.start_attempt().await;
                    }
                }
            }

            // Drops the socket or the pending timer
            worker.link = Link::Idle;
            worker.set_state(ConnectionState::Closed).await;
            info!("Broadcast session stopped");
        });

        (
            Self {
                commands: command_tx,
                state: state_rx,
                join_handle,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask for a connection now
    ///
    /// No-op while connecting or open; cancels a pending reconnect timer
    /// otherwise.
    pub fn connect(&self) -> Result<()> {
        match self.commands.try_send(SessionCommand::Connect) {
            Ok(()) => Ok(()),
            // Queued requests already cover this one
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::other("Broadcast session is stopped"))
            }
        }
    }

    /// Close the socket, cancel any pending reconnect and wait for the worker
    ///
    /// The event receiver must be drained or dropped first, otherwise the
    /// worker may be parked on a full event queue and never see the request.
    pub async fn stop(self) -> Result<()> {
        // The worker may already be gone if its consumer dropped
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(err) = self.join_handle.await {
            if err.is_cancelled() {
                warn!("Broadcast session task cancelled: {err}");
                return Ok(());
            }
            return Err(Error::other(format!("Session join error: {err}")));
        }
        Ok(())
    }
}

enum Link {
    Idle,
    Connecting(BoxFuture<'static, Result<MessageStream>>),
    Open(MessageStream),
    Waiting(Pin<Box<Sleep>>),
}

enum Step {
    Command(Option<SessionCommand>),
    Handshake(Result<MessageStream>),
    Frame(Option<Result<String>>),
    Retry,
}

struct SessionWorker {
    connector: Arc<dyn PushConnector>,
    reconnect_delay: Duration,
    events: mpsc::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    link: Link,
}

impl SessionWorker {
    async fn on_connect_request(&mut self) {
        match self.link {
            Link::Connecting(_) | Link::Open(_) => {
                debug!("Connect requested while already connecting or open, ignoring");
            }
            Link::Idle | Link::Waiting(_) => self.start_attempt().await,
        }
    }

    async fn start_attempt(&mut self) {
        let connector = Arc::clone(&self.connector);
        // Replacing the link cancels a pending reconnect timer
        self.link = Link::Connecting(async move { connector.connect().await }.boxed());
        self.set_state(ConnectionState::Connecting).await;
    }

    async fn on_closed(&mut self) {
        self.set_state(ConnectionState::Closed).await;
        debug!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.link = Link::Waiting(Box::pin(sleep(self.reconnect_delay)));
    }

    async fn handle_text(&mut self, text: &str) {
        match StationEvent::parse(text) {
            Ok(StationEvent::SongChange(song)) => {
                debug!(song_id = %song.id, title = %song.title, "Song change received");
                self.emit(SessionEvent::SongChanged(song)).await;
            }
            Ok(StationEvent::Unknown(kind)) => {
                debug!(kind = %kind, "Ignoring push message");
            }
            Err(e) => {
                error!("Dropping push message: {}", e);
            }
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if *self.state.borrow() == state {
            return;
        }
        debug!(state = ?state, "Connection state changed");
        self.state.send_replace(state);
        self.emit(SessionEvent::StateChanged(state)).await;
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Session consumer gone, dropping event");
        }
    }
}
