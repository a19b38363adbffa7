//! The balancer service object: registry, shared HTTP client and settings,
//! constructed once at startup and passed to every component. Nothing here is
//! ambient global state; ownership of the shared pieces is explicit.

use reqwest::Client;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    endpoint::{BalancerError, Endpoint},
    health,
    metrics::TOTAL_ENDPOINTS,
    registry::Registry,
    shutdown::ShutdownManager,
};

/// Startup settings for the balancer, resolved from CLI flags and the
/// environment before construction. All values are final; nothing is
/// reconfigurable at runtime.
#[derive(Debug, Clone)]
pub struct BalancerOptions {
    pub bind_addr: String,
    /// Health-check interval in seconds. Required, no default.
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub upstream_timeout_secs: u64,
}

#[derive(Debug)]
pub struct LoadBalancer {
    pub registry: Registry,
    /// Shared transport for forwarding; connection pooling is handled by the
    /// client itself.
    pub client: Client,
    pub bind_addr: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub upstream_timeout_secs: u64,
}

impl LoadBalancer {
    pub fn new(endpoints: Vec<Endpoint>, opts: BalancerOptions) -> Result<Self, BalancerError> {
        let pool_size = endpoints.len();
        TOTAL_ENDPOINTS.set(pool_size as i64);

        let client = Client::builder()
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(opts.probe_timeout_secs))
            .timeout(Duration::from_secs(opts.upstream_timeout_secs))
            .build()
            .map_err(|e| BalancerError::Config(e.to_string()))?;

        info!(
            bind_addr = %opts.bind_addr,
            probe_interval_secs = opts.probe_interval_secs,
            probe_timeout_secs = opts.probe_timeout_secs,
            upstream_timeout_secs = opts.upstream_timeout_secs,
            endpoints_count = pool_size,
            "LoadBalancer initialized"
        );

        Ok(Self {
            registry: Registry::new(endpoints),
            client,
            bind_addr: opts.bind_addr,
            probe_interval_secs: opts.probe_interval_secs,
            probe_timeout_secs: opts.probe_timeout_secs,
            upstream_timeout_secs: opts.upstream_timeout_secs,
        })
    }

    /// Spawns the perpetual health monitor under the shutdown coordinator.
    pub fn run_background_tasks(self: &Arc<Self>, shutdown_manager: &mut ShutdownManager) {
        let monitor = self.clone();
        shutdown_manager.spawn(health::health_check_loop(monitor, shutdown_manager.subscribe()));
    }

    /// Pool snapshot served on `/status`.
    pub fn get_status(&self) -> Value {
        let pool = self.registry.snapshot();
        let live_count = pool.iter().filter(|ep| ep.live).count();

        serde_json::json!({
            "bind_addr": self.bind_addr,
            "probe_interval_secs": self.probe_interval_secs,
            "probe_timeout_secs": self.probe_timeout_secs,
            "total_endpoints": pool.len(),
            "live_endpoints": live_count,
            "all_down": self.registry.is_all_down(),
            "rotation_cursor": self.registry.cursor(),
            "endpoints": pool.iter().enumerate().map(|(i, ep)| {
                serde_json::json!({
                    "index": i,
                    "host": ep.host,
                    "port": ep.port,
                    "live": ep.live,
                })
            }).collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint { host: "127.0.0.1".to_string(), port, live: true }
    }

    fn opts() -> BalancerOptions {
        BalancerOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            probe_interval_secs: 5,
            probe_timeout_secs: 1,
            upstream_timeout_secs: 5,
        }
    }

    #[test]
    fn status_reports_pool_state() {
        let balancer = LoadBalancer::new(vec![ep(9001), ep(9002)], opts()).unwrap();
        balancer.registry.set_dead(1);

        let status = balancer.get_status();
        assert_eq!(status["total_endpoints"], 2);
        assert_eq!(status["live_endpoints"], 1);
        assert_eq!(status["all_down"], false);
        assert_eq!(status["endpoints"][1]["live"], false);
        assert_eq!(status["endpoints"][1]["port"], 9002);
    }
}
