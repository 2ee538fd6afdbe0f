//! Chat client
//!
//! `ClientConnection` wraps one TCP connection to the server: send a line,
//! receive a line with a bounded wait, close. `ChatClient` layers the
//! reconnect policy on top and can run the background receive loop that
//! feeds a UI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{closed_signal, LineReader};
use crate::error::ClientError;
use crate::message::is_blank;

/// Outcome of one bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A non-blank line arrived
    Line(String),
    /// Nothing arrived within the read timeout
    Nothing,
    /// The connection is gone
    Closed,
}

/// A single connection to the chat server
#[derive(Debug)]
pub struct ClientConnection {
    server: String,
    alive: AtomicBool,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    read_timeout: std::time::Duration,
}

impl ClientConnection {
    /// Connect with the default 5 second read timeout
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::connect_with(host, port, ClientConfig::default()).await
    }

    /// Connect with explicit timing
    pub async fn connect_with(
        host: &str,
        port: u16,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let server = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ClientError::Connect {
                addr: server.clone(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        debug!("Connected to {}", server);

        Ok(Self {
            server,
            alive: AtomicBool::new(true),
            reader: Mutex::new(Some(LineReader::new(Box::new(read_half)))),
            writer: Mutex::new(Some(write_half)),
            closed,
            read_timeout: config.read_timeout,
        })
    }

    /// Fresh connection, or `None` if the server is unreachable
    pub async fn reconnect(host: &str, port: u16, config: ClientConfig) -> Option<Self> {
        Self::connect_with(host, port, config).await.ok()
    }

    /// `host:port` this connection was opened to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Advisory liveness
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Write `text` plus a newline; returns whether it was written
    ///
    /// No-op on a dead connection. A write failure marks the connection dead,
    /// and a `close()` from another task abandons a write that is stuck.
    pub async fn send(&self, text: &str) -> bool {
        if !self.is_alive() {
            return false;
        }

        let mut closed = self.closed.subscribe();
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return false;
        };

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');

        let outcome = tokio::select! {
            biased;
            written = stream.write_all(&bytes) => Some(written),
            _ = closed_signal(&mut closed) => None,
        };

        match outcome {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                debug!("Send to {} failed: {}", self.server, e);
                writer.take();
                drop(writer);
                self.close().await;
                false
            }
            None => {
                writer.take();
                false
            }
        }
    }

    /// Wait up to the read timeout for one line
    ///
    /// A timeout or a blank line is `Nothing`; EOF or an I/O error marks
    /// the connection dead and yields `Closed`.
    pub async fn receive_or_timeout(&self) -> Received {
        if !self.is_alive() {
            return Received::Closed;
        }

        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let Some(lines) = reader.as_mut() else {
            return Received::Closed;
        };

        let outcome = tokio::select! {
            _ = closed_signal(&mut closed) => None,
            read = timeout(self.read_timeout, lines.next_line()) => Some(read),
        };

        match outcome {
            Some(Err(_elapsed)) => Received::Nothing,
            Some(Ok(Ok(line))) if is_blank(&line) => Received::Nothing,
            Some(Ok(Ok(line))) => Received::Line(line),
            Some(Ok(Err(e))) => {
                debug!("Connection to {} ended: {}", self.server, e);
                reader.take();
                drop(reader);
                self.close().await;
                Received::Closed
            }
            None => {
                reader.take();
                Received::Closed
            }
        }
    }

    /// Close the socket and mark the connection dead; idempotent
    pub async fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("Closing connection to {}", self.server);
        }
        self.closed.send_replace(true);

        // A pending send or receive drops its half itself once it sees the signal
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Some(mut stream) = writer.take() {
                let _ = stream.shutdown().await;
            }
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

/// What the background loop reports to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// First successful connection made by the loop
    Connected { server: String },
    /// Connection re-established after a loss
    Reconnected { server: String },
    /// A line from the server
    Line(String),
    /// A connect attempt failed; reported once per outage
    ConnectFailed { reason: String },
}

/// Reconnecting chat client
#[derive(Debug)]
pub struct ChatClient {
    host: String,
    port: u16,
    config: ClientConfig,
    current: Mutex<Option<Arc<ClientConnection>>>,
}

impl ChatClient {
    /// Client for `host:port`; nothing is dialled yet
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(host, port, ClientConfig::default())
    }

    pub fn with_config(host: impl Into<String>, port: u16, config: ClientConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            current: Mutex::new(None),
        }
    }

    /// Connect if not already connected
    ///
    /// Returns `Ok(false)` when a live connection already exists, `Ok(true)`
    /// when a new one was opened. A stale connection is closed before
    /// dialling. The dial runs without holding the connection slot, so
    /// `send` and `receive` stay responsive while the server is unreachable.
    pub async fn ensure_connected(&self) -> Result<bool, ClientError> {
        let stale = {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|conn| conn.is_alive()) {
                return Ok(false);
            }
            current.take()
        };
        if let Some(conn) = stale {
            conn.close().await;
        }

        let conn = Arc::new(
            ClientConnection::connect_with(&self.host, self.port, self.config).await?,
        );

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|existing| existing.is_alive()) {
            // Another caller connected first
            drop(current);
            conn.close().await;
            return Ok(false);
        }
        info!("Connected to {}", conn.server());
        *current = Some(conn);
        Ok(true)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection().await.is_some_and(|conn| conn.is_alive())
    }

    /// Send user input; trimmed, blank input ignored
    ///
    /// Returns whether anything was written.
    pub async fn send(&self, text: &str) -> bool {
        let text = text.trim();
        if is_blank(text) {
            return false;
        }
        match self.connection().await {
            Some(conn) => conn.send(text).await,
            None => false,
        }
    }

    /// Bounded read on the current connection
    pub async fn receive(&self) -> Received {
        match self.connection().await {
            Some(conn) => conn.receive_or_timeout().await,
            None => Received::Closed,
        }
    }

    /// Close the current connection, if any
    pub async fn disconnect(&self) {
        if let Some(conn) = self.current.lock().await.take() {
            conn.close().await;
        }
    }

    /// Run the receive/reconnect loop until the event receiver is dropped
    pub fn spawn_listener(self: Arc<Self>) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { self.listen(tx).await });
        (handle, rx)
    }

    async fn listen(&self, events: mpsc::UnboundedSender<ClientEvent>) {
        let mut had_connection = self.connection().await.is_some();
        let mut failure_reported = false;

        while !events.is_closed() {
            if self.is_connected().await {
                if let Received::Line(line) = self.receive().await {
                    let _ = events.send(ClientEvent::Line(line));
                }
            } else {
                match self.ensure_connected().await {
                    Ok(true) => {
                        let server = format!("{}:{}", self.host, self.port);
                        let event = if had_connection {
                            ClientEvent::Reconnected { server }
                        } else {
                            ClientEvent::Connected { server }
                        };
                        had_connection = true;
                        failure_reported = false;
                        let _ = events.send(event);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        if !failure_reported {
                            failure_reported = true;
                            let _ = events.send(ClientEvent::ConnectFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            sleep(self.config.poll_interval).await;
        }

        debug!("Client listener stopped");
    }

    async fn connection(&self) -> Option<Arc<ClientConnection>> {
        self.current.lock().await.clone()
    }
}
