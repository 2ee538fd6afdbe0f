//! Per-connection receive loop
//!
//! Reads lines from one client, drops blank ones, forwards the rest to
//! every other registered connection, and tears the connection down on
//! EOF, read error, or local close.

use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::event::{EventLog, ServerEvent};
use crate::message::{is_blank, Message};
use crate::registry::ConnectionRegistry;

/// Drive one connection until it ends
///
/// Teardown runs once, when the loop exits. It races safely with a
/// server shutdown because `remove` and `close` are both idempotent.
pub async fn handle_connection(
    conn: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    log: EventLog,
) {
    let outcome = loop {
        match conn.receive_line().await {
            Ok(line) => {
                if is_blank(&line) {
                    continue;
                }

                log.record(ServerEvent::ClientLine {
                    peer: conn.peer().to_string(),
                    line: line.clone(),
                });

                let forward = Message::from_client(conn.peer(), line).to_line();
                let delivered = registry.broadcast_except(&forward, conn.id());
                debug!("Forwarded line from {} to {} peers", conn.id(), delivered);
            }
            Err(e) => break e,
        }
    };

    registry.remove(conn.id());
    conn.close();

    match outcome {
        ConnectionError::Read(e) => log.record(ServerEvent::ConnectionLost {
            peer: conn.peer().to_string(),
            reason: e.to_string(),
        }),
        ConnectionError::EndOfStream | ConnectionError::Closed => {
            log.record(ServerEvent::ClientLeft {
                peer: conn.peer().to_string(),
            })
        }
    }

    debug!("Receive loop ended for {}", conn.id());
}
