//! Connection registry
//!
//! Copy-on-write set of live connections. Writers build a new map and swap
//! it in; readers clone the current `Arc` and iterate that snapshot without
//! holding any lock, so a broadcast never blocks the accept path and a
//! concurrent add/remove never disturbs an iteration in progress.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::connection::Connection;
use crate::types::ClientId;

/// Point-in-time view of the registry membership
pub type Snapshot = Arc<HashMap<ClientId, Arc<Connection>>>;

/// Thread-safe set of live connections keyed by `ClientId`
///
/// Membership is the sole source of truth for who receives broadcasts.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: RwLock<Snapshot>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection
    pub fn add(&self, conn: Arc<Connection>) {
        let id = conn.id();
        let total = self.update(|members| {
            members.insert(id, conn);
            true
        });
        if let Some(total) = total {
            debug!("Registered connection {}, total: {}", id, total);
        }
    }

    /// Remove by identity; returns whether it was present
    ///
    /// Removing an absent connection is a no-op and leaves the snapshot untouched.
    pub fn remove(&self, id: ClientId) -> bool {
        match self.update(|members| members.remove(&id).is_some()) {
            Some(total) => {
                debug!("Removed connection {}, total: {}", id, total);
                true
            }
            None => false,
        }
    }

    /// Current membership, immune to later mutation
    pub fn snapshot(&self) -> Snapshot {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*members)
    }

    /// Send `line` to every registered connection
    ///
    /// Returns the number of connections it was handed to. Dead peers are
    /// skipped silently by `Connection::send`.
    pub fn broadcast_all(&self, line: &str) -> usize {
        self.fan_out(line, None)
    }

    /// Send `line` to every registered connection except `excluded`
    pub fn broadcast_except(&self, line: &str, excluded: ClientId) -> usize {
        self.fan_out(line, Some(excluded))
    }

    /// Close every connection and empty the registry
    pub fn close_all(&self) {
        let members = {
            let mut guard = self.members.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for conn in members.values() {
            conn.close();
        }
        debug!("Closed {} connections", members.len());
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.snapshot().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn fan_out(&self, line: &str, excluded: Option<ClientId>) -> usize {
        let members = self.snapshot();
        let mut delivered = 0;
        for (id, conn) in members.iter() {
            if Some(*id) == excluded {
                continue;
            }
            conn.send(line);
            delivered += 1;
        }
        delivered
    }

    /// Copy, mutate, swap. The new map is only published if `f` reports a
    /// change; the result is the size of the map that was published.
    fn update<F>(&self, f: F) -> Option<usize>
    where
        F: FnOnce(&mut HashMap<ClientId, Arc<Connection>>) -> bool,
    {
        let mut guard = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        if !f(&mut next) {
            return None;
        }
        let total = next.len();
        *guard = Arc::new(next);
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::time::timeout;

    use super::*;

    fn connection(peer: &str) -> (Arc<Connection>, BufReader<DuplexStream>) {
        let (local, remote) = duplex(4096);
        (Connection::new(local, peer), BufReader::new(remote))
    }

    async fn read_line(remote: &mut BufReader<DuplexStream>) -> Option<String> {
        let mut line = String::new();
        match timeout(Duration::from_millis(200), remote.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(line.trim_end().to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, _rb) = connection("b");

        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));

        assert!(registry.remove(a.id()));
        assert!(!registry.contains(a.id()));
        assert!(registry.contains(b.id()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, _rb) = connection("b");
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));

        assert!(registry.remove(a.id()));
        let after_first = registry.snapshot();
        assert!(!registry.remove(a.id()));
        let after_second = registry.snapshot();

        assert!(Arc::ptr_eq(&after_first, &after_second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_same_peer_tag_registers_twice() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("10.0.0.1:5000");
        let (b, _rb) = connection("10.0.0.1:5000");
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a.id()));
        assert!(registry.contains(b.id()));
    }

    #[tokio::test]
    async fn test_update_reports_size_of_published_map() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let id = a.id();

        let added = registry.update(|members| {
            members.insert(id, a);
            true
        });
        assert_eq!(added, Some(1));
        assert_eq!(
            registry.update(|members| members.remove(&ClientId::new()).is_some()),
            None
        );
        assert_eq!(
            registry.update(|members| members.remove(&id).is_some()),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_adding_same_connection_twice_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&a));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_mutation() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, _rb) = connection("b");
        registry.add(Arc::clone(&a));

        let snapshot = registry.snapshot();
        registry.add(Arc::clone(&b));
        registry.remove(a.id());

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&a.id()));
        assert!(!registry.contains(a.id()));
        assert!(registry.contains(b.id()));
    }

    #[tokio::test]
    async fn test_broadcast_all_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let (a, mut ra) = connection("a");
        let (b, mut rb) = connection("b");
        registry.add(a);
        registry.add(b);

        assert_eq!(registry.broadcast_all("Server: bye"), 2);
        assert_eq!(read_line(&mut ra).await.as_deref(), Some("Server: bye"));
        assert_eq!(read_line(&mut rb).await.as_deref(), Some("Server: bye"));
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let registry = ConnectionRegistry::new();
        let (a, mut ra) = connection("a");
        let (b, mut rb) = connection("b");
        let (c, mut rc) = connection("c");
        let sender = a.id();
        registry.add(a);
        registry.add(b);
        registry.add(c);

        assert_eq!(registry.broadcast_except("Client (a): hi", sender), 2);
        assert_eq!(read_line(&mut rb).await.as_deref(), Some("Client (a): hi"));
        assert_eq!(read_line(&mut rc).await.as_deref(), Some("Client (a): hi"));
        assert_eq!(read_line(&mut ra).await, None);
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_closed_member() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, mut rb) = connection("b");
        registry.add(Arc::clone(&a));
        registry.add(b);

        a.close();
        registry.broadcast_all("still here");
        assert_eq!(read_line(&mut rb).await.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_dropped_peer() {
        let registry = ConnectionRegistry::new();
        let (a, ra) = connection("a");
        let (b, mut rb) = connection("b");
        registry.add(a);
        registry.add(b);

        drop(ra);
        registry.broadcast_all("one");
        registry.broadcast_all("two");
        assert_eq!(read_line(&mut rb).await.as_deref(), Some("one"));
        assert_eq!(read_line(&mut rb).await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, _rb) = connection("b");
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));

        registry.close_all();
        assert!(registry.is_empty());
        assert!(!a.is_alive());
        assert!(!b.is_alive());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_remove_leaves_exact_membership() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        let mut kept = Vec::new();
        let mut remotes = Vec::new();

        for i in 0..64 {
            let (conn, remote) = connection(&format!("peer-{i}"));
            remotes.push(remote);
            let removed = i % 2 == 0;
            if !removed {
                kept.push(conn.id());
            }
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.add(Arc::clone(&conn));
                registry.broadcast_all("noise");
                if removed {
                    registry.remove(conn.id());
                    registry.remove(conn.id());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), kept.len());
        for id in &kept {
            assert!(snapshot.contains_key(id));
        }
    }
}
