//! Round-robin reverse-proxy load balancer: a liveness-tracking endpoint
//! registry, a rotation scheduler and a failover dispatch path, fronted by an
//! axum server and a periodic TCP health monitor.

pub mod balancer;
pub mod config;
pub mod endpoint;
pub mod forwarder;
pub mod registry;
pub mod shutdown;
pub mod utils;
pub use utils::health;
pub use utils::metrics;
pub use utils::probe;
