use crate::error::ForwardError;
use crate::forwarder::{Forwarder, HttpForwarder, ProxyRequest, ProxyResponse};
use crate::health::Health;

use log::{info, warn};
use reqwest::{Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};

/// Represents a backend server resource to which the load balancer can forward the requests.
#[derive(Debug)]
pub struct Backend {
    /// Address of the backend server, contains the protocol, hostname and port. For example:
    /// http://localhost:8081
    address: Url,

    /// Whether the backend server is believed reachable. Written by the health checker and by
    /// failing requests, read by peer selection.
    alive: AtomicBool,

    /// Sends the requests to the backend server.
    forwarder: Box<dyn Forwarder>,
}

impl Backend {
    /// Creates a new backend server, considered alive until proven otherwise.
    pub fn new(address: Url, forwarder: Box<dyn Forwarder>) -> Self {
        Self {
            address,
            alive: AtomicBool::new(true),
            forwarder,
        }
    }

    /// Creates a backend server forwarding the requests over HTTP with the given client.
    pub fn http(address: Url, client: Client) -> Self {
        let forwarder = HttpForwarder::new(address.clone(), client);
        Self::new(address, Box::new(forwarder))
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> Health {
        Health::from(self.is_alive())
    }

    /// Updates the liveness of the backend server. Setting the current value again has no
    /// effect.
    pub fn set_alive(&self, alive: bool) {
        let was_alive = self.alive.swap(alive, Ordering::Relaxed);
        if was_alive && !alive {
            warn!("Backend server {} is now down", self.address);
        } else if !was_alive && alive {
            info!("Backend server {} is up again", self.address);
        }
    }

    /// Sends the request to the backend server. The liveness is left untouched whatever the
    /// outcome, deciding what a failure means is up to the caller.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, ForwardError> {
        self.forwarder.forward(request).await
    }
}
