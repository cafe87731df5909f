use crate::backend::Backend;
use crate::health::{probe, Health};

use log::{debug, info};
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time after which a health probe gives up on a backend server.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Represents a very basic load balancer. Hands out the alive backend servers in a round robin
/// fashion.
#[derive(Debug)]
pub struct ServerPool {
    /// List of backend servers, in configuration order. Fixed once the pool is serving.
    backends: Vec<Arc<Backend>>,

    /// Incremented on every selection, the next backend server is taken modulo the number of
    /// backends.
    current: AtomicUsize,

    /// Time after which a health probe gives up on a backend server.
    probe_timeout: Duration,
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerPool {
    pub fn new() -> Self {
        Self::with_probe_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self {
            backends: Vec::new(),
            current: AtomicUsize::new(0),
            probe_timeout,
        }
    }

    /// Adds a backend server at the end of the rotation. Only meant for setting up the pool,
    /// before it is shared.
    pub fn add_backend(&mut self, backend: Backend) {
        info!("Configured server: {}", backend.address());
        self.backends.push(Arc::new(backend));
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Returns the next alive backend server to which the request can be sent. Every backend is
    /// looked at most once, None is returned if all of them are down.
    pub fn next_peer(&self) -> Option<Arc<Backend>> {
        if self.is_empty() {
            return None;
        }

        // Concurrent callers each get their own starting point
        let start = self.current.fetch_add(1, Ordering::Relaxed);
        let len = self.backends.len();

        for offset in 0..len {
            let backend = &self.backends[(start.wrapping_add(offset)) % len];
            if backend.is_alive() {
                debug!("selected backend {}", backend.address());
                return Some(Arc::clone(backend));
            }
        }

        None
    }

    /// Updates the liveness of the backend server at `address`. Unknown addresses are ignored.
    pub fn mark_backend_status(&self, address: &Url, alive: bool) {
        match self.backends.iter().find(|b| b.address() == address) {
            Some(backend) => backend.set_alive(alive),
            None => debug!("no backend server at {}, status left unchanged", address),
        }
    }

    /// Checks and update the health status of all backend servers, one after the other. Each
    /// probe is bounded by the probe timeout so an unreachable backend cannot hold up the others.
    pub async fn health_check(&self) {
        for backend in &self.backends {
            let health = probe(backend.address(), self.probe_timeout).await;
            backend.set_alive(health == Health::Healthy);
            debug!("{} [{:?}]", backend.address(), health);
        }
    }
}
