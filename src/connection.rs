//! Server-side connection wrapper
//!
//! One `Connection` per accepted socket. Outbound lines go through an
//! unbounded channel to a dedicated writer task, so writes to one peer are
//! serialized and a slow peer never stalls a broadcast. Inbound lines are
//! read on demand by the connection's receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::debug;

use crate::error::ConnectionError;
use crate::message::strip_terminator;
use crate::types::ClientId;

/// Upper bound on flushing queued output once a connection is closed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Buffered line reader that survives cancellation
///
/// Bytes of a partially read line are kept in `pending`, so dropping a
/// `next_line` future (timeout, shutdown) loses nothing.
pub(crate) struct LineReader {
    reader: BufReader<BoxedReader>,
    pending: Vec<u8>,
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LineReader {
    pub(crate) fn new(reader: BoxedReader) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Read the next line without its terminator
    ///
    /// A final unterminated line before EOF is returned as a line; the
    /// following call reports `EndOfStream`.
    pub(crate) async fn next_line(&mut self) -> Result<String, ConnectionError> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Err(ConnectionError::EndOfStream);
        }

        let raw = std::mem::take(&mut self.pending);
        Ok(strip_terminator(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// A live client connection as seen by the server
pub struct Connection {
    id: ClientId,
    peer: String,
    alive: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
    reader: Mutex<LineReader>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Connection {
    /// Wrap a transport and spawn its writer task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, peer: impl Into<String>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            id: ClientId::new(),
            peer: peer.into(),
            alive: AtomicBool::new(true),
            outbound,
            reader: Mutex::new(LineReader::new(Box::new(read_half))),
            closed,
        });

        tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            closed_rx,
            Arc::downgrade(&conn),
        ));

        conn
    }

    /// Registry key for this connection
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Peer address, used as the display tag
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Advisory liveness; a `true` result does not guarantee the next send lands
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    /// Queue `line` for delivery; silently dropped if the connection is dead
    pub fn send(&self, line: &str) {
        if !self.is_alive() {
            return;
        }
        let _ = self.outbound.send(line.to_string());
    }

    /// Wait for the next line from the peer
    ///
    /// Resolves with `Closed` as soon as `close()` is called, even while a
    /// read is pending.
    pub async fn receive_line(&self) -> Result<String, ConnectionError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ConnectionError::Closed);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = closed_signal(&mut closed) => Err(ConnectionError::Closed),
            line = reader.next_line() => line,
        }
    }

    /// Mark the connection dead and shut the transport down
    ///
    /// Idempotent and safe to call concurrently.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("Closing connection {} ({})", self.id, self.peer);
        }
        self.closed.send_replace(true);
    }
}

/// Drain the outbound queue into the transport until closed or broken
///
/// Every write races the close flag, so a peer that stops reading cannot
/// pin the transport open after `close()`.
async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut closed: watch::Receiver<bool>,
    conn: Weak<Connection>,
) where
    S: AsyncWrite + Send,
{
    loop {
        let line = tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => {
                // Idle at close: flush what was queued, within a bound
                let flushed = timeout(CLOSE_FLUSH_TIMEOUT, async {
                    while let Ok(line) = outbound.try_recv() {
                        write_line(&mut writer, line).await?;
                    }
                    Ok::<(), std::io::Error>(())
                })
                .await;
                if !matches!(flushed, Ok(Ok(()))) {
                    debug!("Dropping unflushed output on close");
                }
                break;
            }
            line = outbound.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            written = write_line(&mut writer, line) => written,
            _ = closed_signal(&mut closed) => {
                // Mid-write at close: the line is torn, so nothing more is sent
                debug!("Write interrupted by close");
                break;
            }
        };

        if let Err(e) = written {
            debug!("Write failed, marking connection dead: {}", e);
            if let Some(conn) = conn.upgrade() {
                conn.close();
            }
            break;
        }
    }

    let _ = timeout(CLOSE_FLUSH_TIMEOUT, writer.shutdown()).await;
    debug!("Write task ended");
}

/// Resolves once the close flag is raised or its sender is gone
pub(crate) async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn write_line<W>(writer: &mut W, line: String) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = line.into_bytes();
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}
