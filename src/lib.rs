//! Line-oriented TCP chat library
//!
//! A minimal multi-client chat: the server accepts TCP connections and
//! forwards each received line to every other connected client; the client
//! connects, sends typed lines, and receives lines with a bounded wait.
//!
//! # Protocol
//! Plain text, one message per `\n`-terminated line, no escaping.
//! Forwarded lines read `Client (<addr>): <text>`, operator lines read
//! `Server: <text>`.
//!
//! # Architecture
//! - `ConnectionRegistry` is a copy-on-write set of live connections;
//!   broadcasts iterate a snapshot and never block the accept path
//! - the accept loop runs in one task and spawns one receive loop task per
//!   connection
//! - each `Connection` owns a writer task, so writes to one peer never
//!   interleave
//!
//! # Example
//! ```ignore
//! use line_chat::{start_server, EventLog};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = start_server("127.0.0.1:12345", EventLog::tracing_only())
//!         .await
//!         .unwrap();
//!     server.broadcast_local("hello everyone");
//!     server.shutdown().await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ClientConnection, ClientEvent, Received};
pub use config::{ClientConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::Connection;
pub use error::{ClientError, ConnectionError, ServerError};
pub use event::{EventLog, ServerEvent};
pub use handler::handle_connection;
pub use message::Message;
pub use registry::ConnectionRegistry;
pub use server::{start_server, ServerHandle};
pub use types::ClientId;
