//! Accept loop and server handle
//!
//! `start_server` binds the listener and spawns one long-lived accept task.
//! Each accepted socket becomes a `Connection`, is registered, and gets its
//! own receive loop task. There is no connection limit and no backpressure:
//! every client costs one task plus one writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::ServerError;
use crate::event::{EventLog, ServerEvent};
use crate::handler::handle_connection;
use crate::message::{is_blank, Message};
use crate::registry::ConnectionRegistry;

/// Handle to a running server
///
/// Dropping the handle without calling `shutdown` leaves the server running.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    log: EventLog,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

/// Bind `addr` and start accepting clients
///
/// A bind failure is the only error that stops the server from starting.
pub async fn start_server<A>(addr: A, log: EventLog) -> Result<ServerHandle, ServerError>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Listen {
            addr: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    log.record(ServerEvent::Listening { addr: local_addr });

    let registry = Arc::new(ConnectionRegistry::new());
    let (shutdown, shutdown_rx) = watch::channel(false);

    let accept_task = tokio::spawn(accept_loop(
        listener,
        Arc::clone(&registry),
        log.clone(),
        shutdown_rx,
    ));

    Ok(ServerHandle {
        local_addr,
        registry,
        log,
        shutdown,
        accept_task: Some(accept_task),
    })
}

impl ServerHandle {
    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared registry of live connections
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Broadcast operator text to every client as `Server: <text>`
    ///
    /// Input is trimmed; blank text is ignored. Returns how many
    /// connections the line was handed to.
    pub fn broadcast_local(&self, text: &str) -> usize {
        let text = text.trim();
        if is_blank(text) {
            return 0;
        }

        let line = Message::from_server(text).to_line();
        self.log.record(ServerEvent::OperatorBroadcast { line: line.clone() });
        self.registry.broadcast_all(&line)
    }

    /// Whether the accept loop is still running
    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting, then close every connection
    ///
    /// Safe to call more than once. Waits for the accept loop to exit so
    /// the listening socket is closed when this returns.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                debug!("Accept task ended abnormally: {}", e);
            }
        }
        self.registry.close_all();
    }
}

/// Accept clients until shutdown is signalled
///
/// Transient accept errors are logged and the loop keeps listening.
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    log: EventLog,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Accept loop started");

    loop {
        tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let peer = peer.to_string();
                    log.record(ServerEvent::ClientArrived { peer: peer.clone() });

                    let conn = Connection::new(stream, peer);
                    registry.add(Arc::clone(&conn));
                    tokio::spawn(handle_connection(conn, Arc::clone(&registry), log.clone()));
                }
                Err(e) => {
                    log.record(ServerEvent::AcceptFailed { reason: e.to_string() });
                }
            },
        }
    }

    drop(listener);
    log.record(ServerEvent::Stopped);
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
