//! Round-robin reverse-proxy load balancer.
//!
//! Main entry point. Responsibilities:
//! 1. Parse CLI arguments / environment for listen address, health-check
//!    interval and the JSON endpoint pool.
//! 2. Run the startup probe sweep so initial liveness is known before the
//!    first request is served.
//! 3. Start the periodic health monitor and the axum front end; every path
//!    except `/status` and `/metrics` is proxied.
//! 4. Handle graceful and forced shutdown on `Ctrl+C` or `SIGTERM`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router, Server,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::init;

use rotor_balancer::balancer::{BalancerOptions, LoadBalancer};
use rotor_balancer::config::load_endpoints;
use rotor_balancer::endpoint::BalancerError;
use rotor_balancer::forwarder;
use rotor_balancer::health;
use rotor_balancer::shutdown::ShutdownManager;

/// Command-line interface. Every flag falls back to the environment; the
/// env names match the original deployment convention.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host or IP to listen on.
    #[arg(long, env = "LB_DOMAIN")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "LB_PORT")]
    port: u16,

    /// Health-check interval in seconds. Required; there is no default.
    #[arg(long, env = "LB_LIVENESS_CHECK_DURATION", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Path to the JSON endpoint pool document.
    #[arg(long, env = "LB_ENDPOINTS_FILE", default_value = "endpoints.json")]
    endpoints: String,

    /// Per-probe TCP connect timeout in seconds.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    probe_timeout: u64,

    /// Overall upstream request timeout in seconds.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    upstream_timeout: u64,

    /// Grace period for in-flight work during shutdown, in seconds.
    #[arg(long, default_value_t = 10)]
    shutdown_grace: u64,

    /// Optional file to record the process PID in.
    #[arg(long)]
    pid_file: Option<String>,
}

/// Proxies every request that no operational route claimed.
async fn proxy_handler(
    State(balancer): State<Arc<LoadBalancer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forwarder::dispatch(&balancer, method, uri, headers, body).await
}

/// Pool state snapshot for monitoring.
async fn handle_status(State(balancer): State<Arc<LoadBalancer>>) -> impl IntoResponse {
    axum::Json(balancer.get_status())
}

/// Renders the metrics registry in Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Metrics encoding failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            format!("metrics unavailable: {e}").into_bytes(),
        );
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
}

#[tokio::main]
async fn main() -> Result<(), BalancerError> {
    init();

    let args = Cli::parse();

    if let Some(path) = &args.pid_file {
        match std::fs::write(path, std::process::id().to_string()) {
            Ok(()) => info!(path = %path, "Wrote PID file"),
            Err(e) => warn!(path = %path, error = %e, "Could not write PID file"),
        }
    }

    let endpoints = load_endpoints(&args.endpoints)?;
    let balancer = Arc::new(LoadBalancer::new(
        endpoints,
        BalancerOptions {
            bind_addr: format!("{}:{}", args.host, args.port),
            probe_interval_secs: args.interval,
            probe_timeout_secs: args.probe_timeout,
            upstream_timeout_secs: args.upstream_timeout,
        },
    )?);

    // Initial liveness must be known before the first request can be served.
    health::startup_sweep(&balancer).await;

    let mut shutdown_manager = ShutdownManager::new();
    balancer.run_background_tasks(&mut shutdown_manager);

    let app = Router::new()
        .route("/status", get(handle_status))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .with_state(balancer.clone());

    let addr = balancer
        .bind_addr
        .parse()
        .map_err(|e: std::net::AddrParseError| BalancerError::Config(e.to_string()))?;
    let server = Server::bind(&addr).serve(app.into_make_service());

    let force_shutdown_atomic = Arc::new(AtomicBool::new(false));
    let force_shutdown_clone = force_shutdown_atomic.clone();

    let graceful = server.with_graceful_shutdown(async move {
        let force = shutdown_signal().await;
        if force {
            force_shutdown_clone.store(true, Ordering::Relaxed);
        }
        info!(
            "Stopping the accept loop ({} shutdown)",
            if force { "forced" } else { "graceful" }
        );
    });

    info!(bind_addr = %balancer.bind_addr, "Load balancer is listening");

    if let Err(e) = graceful.await {
        error!("Server error: {}", e);
    }

    if force_shutdown_atomic.load(Ordering::Relaxed) {
        info!("Aborting the health monitor without draining");
        shutdown_manager.abort();
    } else {
        info!("Draining the health monitor");
        if let Err(e) =
            shutdown_manager.graceful_shutdown(Duration::from_secs(args.shutdown_grace)).await
        {
            error!("Monitor teardown failed: {}", e);
        }
    }

    if let Some(path) = &args.pid_file {
        let _ = std::fs::remove_file(path);
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Waits for a termination signal and reports whether the operator demanded a
/// forced (non-draining) shutdown. SIGTERM and a single `Ctrl+C` both request
/// a graceful stop; a second `Ctrl+C` within the window escalates.
async fn shutdown_signal() -> bool {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler installation failed");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C: stopping. Press again within 10s to skip draining.");
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Second Ctrl+C: skipping the drain.");
                    true
                },
                _ = tokio::time::sleep(Duration::from_secs(10)) => {
                    false
                }
            }
        },
        _ = terminate => {
            info!("SIGTERM: stopping after drain.");
            false
        },
    }
}
