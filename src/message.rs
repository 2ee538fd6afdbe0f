//! Line protocol definitions
//!
//! Plain text over TCP, one message per `\n`-terminated line. There is no
//! escaping: a payload with an embedded newline becomes two messages.
//! Prefixes such as `Server: ` are for human display only.

use std::fmt;

/// Who a broadcast line originates from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// The server operator
    Server,
    /// A connected client, tagged by its peer address
    Client(String),
}

/// An ephemeral chat message, dropped right after fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
}

impl Message {
    /// Message typed by the server operator
    pub fn from_server(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Server,
            text: text.into(),
        }
    }

    /// Message forwarded on behalf of a client
    pub fn from_client(peer: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Client(peer.into()),
            text: text.into(),
        }
    }

    /// Render the wire line (without terminator)
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Sender::Server => write!(f, "Server: {}", self.text),
            Sender::Client(peer) => write!(f, "Client ({}): {}", peer, self.text),
        }
    }
}

/// Whitespace-only input is never forwarded
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Strip a trailing `\n` or `\r\n` from a raw line
pub(crate) fn strip_terminator(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}
