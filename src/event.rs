//! Server event log
//!
//! The append-only sink the core reports connect/disconnect/error events
//! to. Every event is traced; callers that render a console (the UI layer)
//! can also subscribe to a channel of events.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Something worth telling the server operator about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listener is bound
    Listening { addr: SocketAddr },
    /// A client socket was accepted
    ClientArrived { peer: String },
    /// A client line is being forwarded
    ClientLine { peer: String, line: String },
    /// A client went away (EOF or local close)
    ClientLeft { peer: String },
    /// A client read failed
    ConnectionLost { peer: String, reason: String },
    /// `accept()` failed while the listener was still open
    AcceptFailed { reason: String },
    /// The operator broadcast a line
    OperatorBroadcast { line: String },
    /// The accept loop exited
    Stopped,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { addr } => {
                write!(f, "Server initialized on port {}", addr.port())
            }
            ServerEvent::ClientArrived { peer } => write!(f, "Client arrived: {}", peer),
            ServerEvent::ClientLine { peer, line } => write!(f, "Client {}: {}", peer, line),
            ServerEvent::ClientLeft { peer } => write!(f, "Client {} disconnected", peer),
            ServerEvent::ConnectionLost { peer, .. } => write!(f, "Lost connection with {}", peer),
            ServerEvent::AcceptFailed { reason } => write!(f, "Error accepting client: {}", reason),
            ServerEvent::OperatorBroadcast { line } => write!(f, "{}", line),
            ServerEvent::Stopped => write!(f, "Server stopped"),
        }
    }
}

/// Cloneable handle to the event sink
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    subscriber: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl EventLog {
    /// Trace events only
    pub fn tracing_only() -> Self {
        Self::default()
    }

    /// Trace events and also deliver them on the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { subscriber: Some(tx) }, rx)
    }

    /// Append one event
    pub fn record(&self, event: ServerEvent) {
        match &event {
            ServerEvent::AcceptFailed { .. } => warn!("{}", event),
            ServerEvent::ConnectionLost { reason, .. } => warn!("{} ({})", event, reason),
            _ => info!("{}", event),
        }

        if let Some(subscriber) = &self.subscriber {
            // A dropped receiver just means nobody is watching
            let _ = subscriber.send(event);
        }
    }
}
