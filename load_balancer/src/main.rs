/*
 * A minimal load balancer forwarding HTTP requests to a fixed pool of backend servers
 *
 * Author: Samuel Gauthier
 */
mod backend;
mod config;
mod dispatcher;
mod error;
mod failover;
mod forwarder;
mod health;
mod server_pool;

use crate::backend::Backend;
use crate::dispatcher::Dispatcher;
use crate::forwarder::{is_hop_by_hop, ProxyRequest, ProxyResponse};
use crate::health::HealthChecker;
use crate::server_pool::ServerPool;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use clap::Parser;
use log::{error, info};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Largest request body accepted, requests are kept in memory to be sent again on failure.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Load balancer forwarding HTTP requests to a list of backend servers
#[derive(Parser, Debug)]
#[command(name = "minLB", version, about, long_about = None)]
struct Args {
    /// Port to serve
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// All the backends to create a load balancer for, for example: http://localhost:8081
    #[arg(short, long, required = true, value_delimiter = ',')]
    backends: Vec<String>,

    /// Time interval in seconds between health checks
    #[arg(long, default_value = "120", value_parser = clap::value_parser!(u64).range(1..))]
    health_check_interval: u64,

    /// Time in milliseconds after which a health check gives up on a backend
    #[arg(long, default_value = "2000", value_parser = clap::value_parser!(u64).range(1..))]
    probe_timeout: u64,

    /// Time in seconds after which a forwarded request is abandoned
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    forward_timeout: u64,
}

/// Copies what is needed from the inbound request to forward it, possibly several times.
fn proxy_request(request: &HttpRequest, body: web::Bytes) -> ProxyRequest {
    ProxyRequest {
        method: request.method().as_str().to_string(),
        path_and_query: request
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: request
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body,
        client_addr: request.connection_info().peer_addr().map(str::to_string),
    }
}

/// Relays the response of the backend server to the client.
fn http_response(response: ProxyResponse) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);

    for (name, value) in &response.headers {
        // The length is set again from the body
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            builder.append_header((name, value));
        }
    }

    builder.body(response.body)
}

/// Index route of the load balancer. Forwards every request to the next available backend server.
///
/// The body is read from the raw payload so that it reaches the backend exactly as sent, encoded
/// bodies included.
async fn index(
    dispatcher: web::Data<Dispatcher>,
    request: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    let body = match payload.to_bytes_limited(MAX_BODY_SIZE).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            error!("Failed to read the body of {} {}: {}", request.method(), request.uri(), e);
            return HttpResponse::BadRequest().finish();
        }
        Err(_) => {
            error!(
                "Body of {} {} is larger than {} bytes",
                request.method(),
                request.uri(),
                MAX_BODY_SIZE
            );
            return HttpResponse::PayloadTooLarge().finish();
        }
    };
    let proxy_request = proxy_request(&request, body);

    match dispatcher.dispatch(&proxy_request).await {
        Ok(response) => http_response(response),
        Err(e) => {
            error!("Failed to forward {} {}: {}", request.method(), request.uri(), e);
            HttpResponse::ServiceUnavailable().body("Service not available")
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let args = Args::parse();
    let addresses = match config::parse_backends(&args.backends) {
        Ok(addresses) => addresses,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.forward_timeout))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let mut pool = ServerPool::with_probe_timeout(Duration::from_millis(args.probe_timeout));
    for address in addresses {
        pool.add_backend(Backend::http(address, client.clone()));
    }
    let pool = Arc::new(pool);

    info!("Backends running");
    for backend in pool.backends() {
        info!("\t- {} [{:?}]", backend.address(), backend.health());
    }

    // Start a background task that checks the health of the backend servers at regular
    // intervals. The interval can be specified in the command line arguments.
    HealthChecker::new(
        Arc::clone(&pool),
        Duration::from_secs(args.health_check_interval),
    )
    .spawn();

    info!(
        "Load Balancer started at :{} with {} backends",
        args.port,
        pool.len()
    );
    let dispatcher = web::Data::new(Dispatcher::new(pool));

    actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .app_data(dispatcher.clone())
            .default_service(web::to(index))
    })
    .bind(("0.0.0.0", args.port))?
    .run()
    .await
}
