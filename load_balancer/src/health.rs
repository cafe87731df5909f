use crate::server_pool::ServerPool;

use log::{debug, info};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::{spawn, JoinHandle};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

/// Servers are defined as either healthy or unhealthy. In the case of unhealthy servers, the load
/// balancer will not forward requests to them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl From<bool> for Health {
    fn from(alive: bool) -> Self {
        if alive {
            Health::Healthy
        } else {
            Health::Unhealthy
        }
    }
}

/// Checks whether the backend server at `address` accepts TCP connections. The server is
/// considered unhealthy if the connection cannot be established within `probe_timeout`.
pub async fn probe(address: &Url, probe_timeout: Duration) -> Health {
    let (host, port) = match (address.host_str(), address.port_or_known_default()) {
        (Some(host), Some(port)) => (host, port),
        _ => {
            debug!("Backend server {} has no host or port to probe", address);
            return Health::Unhealthy;
        }
    };
    // IPv6 literals keep their brackets in host_str
    let target = format!("{}:{}", host, port);

    match timeout(probe_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(_)) => Health::Healthy,
        Ok(Err(e)) => {
            info!("Backend server {} unreachable: {}", address, e);
            Health::Unhealthy
        }
        Err(_) => {
            info!(
                "Backend server unreachable, no answer from {} within {}ms",
                target,
                probe_timeout.as_millis()
            );
            Health::Unhealthy
        }
    }
}

/// Background task checking the health of all the backend servers of a pool at regular
/// intervals.
pub struct HealthChecker {
    pool: Arc<ServerPool>,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(pool: Arc<ServerPool>, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Starts the checks. The first one runs one interval from now, the backend servers are
    /// assumed alive until then.
    pub fn spawn(self) -> JoinHandle<()> {
        spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        // A slow check pushes the next one back instead of triggering a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The loop will run indefinitely
        loop {
            ticker.tick().await;
            info!("Starting health check...");
            let start_time = std::time::Instant::now();

            self.pool.health_check().await;

            let elapsed_time_ms = start_time.elapsed().as_millis();
            info!("Health check completed in {}ms", elapsed_time_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use reqwest::Client;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_health_from_liveness() {
        assert_eq!(Health::from(true), Health::Healthy);
        assert_eq!(Health::from(false), Health::Unhealthy);
    }

    #[tokio::test]
    async fn test_probe_listening_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        assert_eq!(
            probe(&address, Duration::from_secs(2)).await,
            Health::Healthy
        );
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = closed_port().await;
        let address = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        assert_eq!(
            probe(&address, Duration::from_secs(2)).await,
            Health::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_probe_is_bounded_by_timeout() {
        // TEST-NET-1, never routed
        let address = Url::parse("http://192.0.2.1:81").unwrap();
        let start = std::time::Instant::now();

        assert_eq!(
            probe(&address, Duration::from_millis(200)).await,
            Health::Unhealthy
        );
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_checker_revives_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        let mut pool = ServerPool::new();
        pool.add_backend(Backend::http(address.clone(), Client::new()));
        let pool = Arc::new(pool);
        pool.mark_backend_status(&address, false);
        assert!(pool.next_peer().is_none());

        let handle = HealthChecker::new(Arc::clone(&pool), Duration::from_millis(50)).spawn();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(pool.backends()[0].is_alive());
        assert!(pool.next_peer().is_some());
    }

    #[tokio::test]
    async fn test_checker_waits_one_interval() {
        let port = closed_port().await;
        let address = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        let mut pool = ServerPool::new();
        pool.add_backend(Backend::http(address, Client::new()));
        let pool = Arc::new(pool);

        let handle = HealthChecker::new(Arc::clone(&pool), Duration::from_secs(60)).spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(pool.backends()[0].is_alive());
    }
}
