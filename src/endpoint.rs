//! Core data types for the load balancer.
//!
//! Contains the `Endpoint` struct, one member of the configured backend pool,
//! and the `BalancerError` enum for failures that abort startup.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Fatal startup errors. Per-request failures never surface here; the
/// dispatch path answers them with an HTTP status instead.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for BalancerError {
    fn from(err: ConfigError) -> Self {
        BalancerError::Config(err.to_string())
    }
}

/// One backend target the balancer can forward requests to.
///
/// Identity is the endpoint's position in the configured pool; the pool is
/// fixed for the lifetime of the process. The `live` flag is the balancer's
/// current belief about reachability, owned by the [`Registry`] and mutated
/// only through its transition-aware setters.
///
/// [`Registry`]: crate::registry::Registry
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(deserialize_with = "crate::config::port_from_str_or_int")]
    pub port: u16,
    /// Overwritten by the startup probe sweep; a stale value in the pool
    /// document is ignored.
    #[serde(default)]
    pub live: bool,
}

impl Endpoint {
    /// `host:port`, the form the TCP prober dials.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL the forwarder targets.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
