//! Error types for the chat server and client
//!
//! Uses thiserror for ergonomic error definitions. Only failures a caller
//! can act on are represented here; per-peer write failures and transient
//! accept failures are absorbed where they happen.

use std::io;

use thiserror::Error;

/// Server-level errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound (fatal to startup)
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// IO error outside the accept path
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from reading one line off a connection
///
/// Every variant ends that connection's receive loop and nothing else.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed its side of the stream
    #[error("end of stream")]
    EndOfStream,

    /// The connection was closed locally while a read was pending
    #[error("connection closed")]
    Closed,

    /// The transport failed while reading
    #[error("read error: {0}")]
    Read(#[from] io::Error),
}

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not open a connection to the server
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}
