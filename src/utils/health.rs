//! Background health monitoring.
//!
//! On a fixed wall-clock interval the monitor probes every configured
//! endpoint and pushes the results through the registry's transition-aware
//! setters, so the rotation scheduler only ever selects endpoints believed
//! reachable. A one-off synchronous sweep runs at startup, before the first
//! request can be served, so the pool's initial liveness state is known and
//! summarized in the log.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::balancer::LoadBalancer;
use crate::metrics::PROBE_FAILURES;
use crate::probe::probe;

/// The periodic health-check loop. Runs until the shutdown signal fires;
/// there is no other way for it to stop.
pub async fn health_check_loop(balancer: Arc<LoadBalancer>, mut shutdown_rx: watch::Receiver<()>) {
    // The startup sweep already ran, so the first periodic sweep comes one
    // full interval later.
    let period = Duration::from_secs(balancer.probe_interval_secs);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased; // Prioritize the shutdown signal
            _ = shutdown_rx.changed() => {
                info!("Health monitor received shutdown signal, exiting");
                return;
            }
            _ = ticker.tick() => {
                run_sweep(&balancer).await;
            }
        }
    }
}

/// Probes every endpoint once and applies the initial liveness state without
/// transition notifications, then prints a human-readable summary of the pool
/// (and a one-time all-down alert if nothing is reachable).
pub async fn startup_sweep(balancer: &LoadBalancer) {
    for (i, reachable) in probe_pool(balancer).await {
        balancer.registry.apply_initial(i, reachable);
    }

    info!("Endpoints:");
    let pool = balancer.registry.snapshot();
    for ep in &pool {
        info!(endpoint = %ep, state = if ep.live { "Active" } else { "Down" });
    }
    if balancer.registry.is_all_down() {
        warn!("All connections are down");
    }
}

/// One round of health checks: probe the whole pool, apply transitions in
/// pool order, then recheck the all-down condition.
pub async fn run_sweep(balancer: &LoadBalancer) {
    for (i, reachable) in probe_pool(balancer).await {
        if reachable {
            balancer.registry.set_live(i);
        } else {
            PROBE_FAILURES
                .with_label_values(&[&balancer.registry.endpoint(i).authority()])
                .inc();
            balancer.registry.set_dead(i);
        }
    }
    balancer.registry.check_all_down();
}

/// Fans out one concurrent probe per endpoint and collects the results back
/// into pool order, so transitions are applied deterministically.
async fn probe_pool(balancer: &LoadBalancer) -> Vec<(usize, bool)> {
    let timeout = Duration::from_secs(balancer.probe_timeout_secs);

    let mut set = JoinSet::new();
    for (i, ep) in balancer.registry.snapshot().into_iter().enumerate() {
        set.spawn(async move { (i, probe(&ep.host, ep.port, timeout).await) });
    }

    let mut results = Vec::with_capacity(balancer.registry.len());
    while let Some(res) = set.join_next().await {
        if let Ok(outcome) = res {
            results.push(outcome);
        }
    }
    results.sort_unstable_by_key(|(i, _)| *i);
    results
}
