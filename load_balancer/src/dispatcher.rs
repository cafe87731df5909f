use crate::error::InternalError;
use crate::failover::{AttemptState, Failover, RETRY_BACKOFF};
use crate::forwarder::{ProxyRequest, ProxyResponse};
use crate::server_pool::ServerPool;

use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Sends the inbound requests to the backend servers of a pool. A request failing on a backend
/// is retried there a few times, then the backend is marked down and the request moves on to the
/// next alive one.
#[derive(Debug)]
pub struct Dispatcher {
    pool: Arc<ServerPool>,

    /// Pause before sending a failed request again to the same backend server.
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(pool: Arc<ServerPool>) -> Self {
        Self::with_backoff(pool, RETRY_BACKOFF)
    }

    pub fn with_backoff(pool: Arc<ServerPool>, backoff: Duration) -> Self {
        Self { pool, backoff }
    }

    /// Forwards the request until a backend server answers. Fails once no backend is alive or the
    /// request failed over too many times.
    ///
    /// Everything lives in the returned future: dropping it, for instance because the client went
    /// away, stops the retries.
    pub async fn dispatch(&self, request: &ProxyRequest) -> Result<ProxyResponse, InternalError> {
        let mut state = AttemptState::default();

        loop {
            if state.exhausted() {
                error!(
                    "{} ({}) Max attempts reached, terminating",
                    client(request),
                    request.path_and_query
                );
                return Err(InternalError::MaxAttemptsReached);
            }

            let peer = match self.pool.next_peer() {
                Some(peer) => peer,
                None => {
                    error!(
                        "{} ({}) No backend server available",
                        client(request),
                        request.path_and_query
                    );
                    return Err(InternalError::NoBackendAvailable);
                }
            };
            debug!("Next available backend server: {}", peer.address());

            // Same backend until it answers or runs out of retries
            state = loop {
                let e = match peer.forward(request).await {
                    Ok(response) => return Ok(response),
                    Err(e) => e,
                };
                warn!(
                    "[url: {}] {} (retry {}, attempt {})",
                    peer.address(),
                    e,
                    state.retries(),
                    state.attempts()
                );

                match state.on_failure() {
                    Failover::RetrySame(next) => {
                        sleep(self.backoff).await;
                        state = next;
                    }
                    Failover::NextPeer(next) => {
                        self.pool.mark_backend_status(peer.address(), false);
                        warn!(
                            "{} ({}) Attempting retry {}",
                            client(request),
                            request.path_and_query,
                            next.attempts()
                        );
                        break next;
                    }
                }
            };
        }
    }
}

fn client(request: &ProxyRequest) -> &str {
    request.client_addr.as_deref().unwrap_or("unknown client")
}
