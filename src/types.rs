//! Connection identity
//!
//! A peer's `ip:port` string is only a display tag. Two sockets can report
//! the same tag (NAT, a reused ephemeral port after a fast reconnect), so
//! the registry keys connections by a `ClientId` minted per accepted socket.

use uuid::Uuid;

/// Registry key for one accepted socket, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
