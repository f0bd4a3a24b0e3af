//! Unauthenticated connection registry

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    accepted_at: Instant,
    cancel: CancellationToken,
}

/// Connections that have not authenticated yet.
///
/// The count drives MaxStartups throttling; the periodic tick uses the
/// timestamps to cancel connections past their login grace time.
#[derive(Debug, Default)]
pub struct UnauthRegistry {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl UnauthRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track a new connection; the token fires when its deadline passes
    pub fn register(&self, id: Uuid, peer: SocketAddr) -> CancellationToken {
        self.register_at(id, peer, Instant::now())
    }

    fn register_at(&self, id: Uuid, peer: SocketAddr, accepted_at: Instant) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.entries.lock().insert(
            id,
            Entry {
                peer,
                accepted_at,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Free the slot of an authenticated connection.
    ///
    /// Returns false if the connection had already timed out.
    pub fn mark_authenticated(&self, id: Uuid) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Forget a connection that ended before authenticating
    pub fn remove(&self, id: Uuid) {
        self.entries.lock().remove(&id);
    }

    /// Cancel and remove every entry older than `grace`
    pub fn expire_stale(&self, grace: Duration) -> Vec<(Uuid, SocketAddr)> {
        self.expire_older_than(Instant::now(), grace)
    }

    fn expire_older_than(&self, now: Instant, grace: Duration) -> Vec<(Uuid, SocketAddr)> {
        let mut entries = self.entries.lock();
        let stale: Vec<Uuid> = entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.accepted_at) >= grace)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|e| (id, e)))
            .map(|(id, entry)| {
                entry.cancel.cancel();
                (id, entry.peer)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
