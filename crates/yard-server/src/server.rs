//! The embeddable server handle.
//!
//! A [`Server`] owns the only process-wide collections in the crate: the
//! listener list and the live-connection list, both behind one lock.
//! They exist for busy queries and orderly shutdown; nothing else is
//! shared across connections except the bus itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use yard_bus::Bus;

use crate::config::ListenerConfig;
use crate::error::Result;
use crate::listener;

/// An embeddable HTTP/1.x server: a dispatch bus plus any number of
/// listeners feeding per-connection threads.
pub struct Server {
    bus: Arc<Bus>,
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Bind a listener and start its accept thread. Returns the bound
    /// address, which differs from the configured one when port 0 asked
    /// for an ephemeral port. A failed bind leaves the server untouched.
    pub fn add_listener(&self, cfg: ListenerConfig) -> Result<SocketAddr> {
        listener::spawn(cfg, self.bus.clone(), self.shared.clone())
    }

    /// Whether any connection is currently being served.
    pub fn is_busy(&self) -> bool {
        !self.shared.registry.lock().connections.is_empty()
    }

    /// Addresses of all running listeners.
    pub fn listener_addresses(&self) -> Vec<String> {
        self.shared.registry.lock().listeners.clone()
    }

    /// Ask the accept loops to stop. Connections notice at their next
    /// request boundary; in-flight requests complete normally.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// State shared between the server handle, its listeners and its
/// connections.
#[derive(Default)]
pub(crate) struct Shared {
    registry: Mutex<Registry>,
    stop: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Registry {
    listeners: Vec<String>,
    connections: FxHashMap<u64, String>,
}

impl Shared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn add_listener(&self, address: String) {
        self.registry.lock().listeners.push(address);
    }

    /// Record a live connection; the returned guard unregisters it on
    /// drop.
    pub(crate) fn register_connection(self: &Arc<Self>, peer: String) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().connections.insert(id, peer);
        ConnectionGuard {
            shared: self.clone(),
            id,
        }
    }
}

pub(crate) struct ConnectionGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shared.registry.lock().connections.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_tracks_connection_guards() {
        let server = Server::new(Arc::new(Bus::new()));
        assert!(!server.is_busy());
        let guard = server.shared.register_connection("peer".into());
        assert!(server.is_busy());
        drop(guard);
        assert!(!server.is_busy());
    }

    #[test]
    fn shutdown_raises_the_stop_flag() {
        let server = Server::new(Arc::new(Bus::new()));
        assert!(!server.shared.stop_requested());
        server.shutdown();
        assert!(server.shared.stop_requested());
    }
}
