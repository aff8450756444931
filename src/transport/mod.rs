// Socket transport with bounded reconnect
//
// `TransportSession` owns one socket connection at a time. Opening a socket is
// delegated to a `SocketConnector` so the session can be driven by the real
// WebSocket client or by an in-memory connector in tests. Frames and closures
// arrive as `SocketEvent`s on a channel; the loader pulls them with
// `next_event()` and decides what to do with each one.
//
// State: Closed -> Connecting -> Open -> Closed (or Connecting again on retry)

pub mod protocol;
pub mod websocket;

pub use protocol::{OutboundMessage, ProtocolEnvelope};
pub use websocket::WebSocketConnector;

use crate::config::RetrySettings;
use crate::types::{LoaderError, LoaderResult, RawMessage, SessionState};
use async_trait::async_trait;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Close code of a clean shutdown
pub const CLOSE_NORMAL: u16 = 1000;
/// Close frame carried no status code
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Why a socket closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Any code above 1000 except "no status received"
    pub fn is_abnormal(&self) -> bool {
        self.code > CLOSE_NORMAL && self.code != CLOSE_NO_STATUS
    }
}

/// Something that happened on an open socket
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Message(RawMessage),
    Error(String),
    Closed(CloseInfo),
}

/// Handles to a live socket: outbound text frames, inbound events, and a
/// token that tears down the socket tasks
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
    pub cancel: CancellationToken,
}

impl Connection {
    /// Build a connection plus the far ends of its channels
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<SocketEvent>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let connection = Self {
            outbound,
            inbound,
            cancel: CancellationToken::new(),
        };
        (connection, outbound_rx, inbound_tx)
    }
}

/// Opens sockets for a [`TransportSession`]
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a socket to `url`; an `Err` means the handshake never completed
    async fn open(&self, url: &str) -> LoaderResult<Connection>;
}

/// Retry an abnormal closure, or any failure before the socket opened
pub fn should_retry(close: Option<&CloseInfo>, connected: bool) -> bool {
    match close {
        Some(info) => info.is_abnormal() || !connected,
        None => !connected,
    }
}

pub struct TransportSession {
    url: String,
    retry: RetrySettings,
    connector: Arc<dyn SocketConnector>,
    state: SessionState,
    connection: Option<Connection>,
    protocol: Option<ProtocolEnvelope>,
    request_counter: Arc<AtomicU64>,
}

impl TransportSession {
    pub fn new(url: String, retry: RetrySettings, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            url,
            retry,
            connector,
            state: SessionState::Closed,
            connection: None,
            protocol: None,
            request_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open && self.connection.is_some()
    }

    /// Open the socket, retrying failed attempts up to the configured budget
    pub async fn connect(&mut self) -> LoaderResult<()> {
        if self.connection.is_some() {
            return Err(LoaderError::AlreadyConnected);
        }

        self.state = SessionState::Connecting;
        let mut last_error = String::new();

        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                let delay = self.retry.delay(attempt - 1);
                warn!(
                    "Retrying connection to {} in {:?} (attempt {}/{}): {}",
                    self.url,
                    delay,
                    attempt + 1,
                    self.retry.attempts,
                    last_error
                );
                tokio::time::sleep(delay).await;
            }

            match self.connector.open(&self.url).await {
                Ok(connection) => {
                    self.protocol = Some(ProtocolEnvelope::new(
                        connection.outbound.clone(),
                        Arc::clone(&self.request_counter),
                    ));
                    self.connection = Some(connection);
                    self.state = SessionState::Open;
                    info!("Connected to {}", self.url);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
            }
        }

        self.state = SessionState::Closed;
        Err(LoaderError::RetriesExhausted {
            attempts: self.retry.attempts,
            last_error,
        })
    }

    /// Wait for the next socket event. A closure (or a dropped event channel)
    /// tears the connection down before it is returned. `None` when no socket
    /// is open.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        let connection = self.connection.as_mut()?;
        let event = connection
            .inbound
            .recv()
            .await
            .unwrap_or_else(|| SocketEvent::Closed(CloseInfo::abnormal("event channel closed")));

        if let SocketEvent::Closed(info) = &event {
            info!(
                "Socket to {} closed (code {}{})",
                self.url,
                info.code,
                if info.reason.is_empty() {
                    String::new()
                } else {
                    format!(": {}", info.reason)
                }
            );
            self.teardown();
        }

        Some(event)
    }

    /// Outbound helper of the open socket
    pub fn protocol(&self) -> LoaderResult<&ProtocolEnvelope> {
        match (&self.protocol, self.state) {
            (Some(protocol), SessionState::Open) => Ok(protocol),
            _ => Err(LoaderError::NotConnected),
        }
    }

    pub fn close(&mut self) {
        if self.connection.is_some() {
            info!("Closing socket to {}", self.url);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
        }
        self.protocol = None;
        self.state = SessionState::Closed;
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
