//! Startup configuration loading and validation.
//!
//! The balancer is configured at startup and never reconfigured at runtime:
//! listen address and health-check interval come from CLI flags with
//! environment fallbacks, and the backend pool comes from a JSON document
//! (an ordered array of `{host, port}` objects). Any missing or malformed
//! value here is fatal; the process must not serve traffic with a partial
//! configuration.

use serde::{Deserialize, Deserializer};
use std::fs;
use thiserror::Error;
use tracing::info;

use crate::endpoint::Endpoint;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read endpoints file '{path}': {source}")]
    Read { path: String, source: std::io::Error },
    #[error("Failed to parse endpoints file '{path}': {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),
    #[error("No endpoints configured")]
    EmptyPool,
}

/// Accepts a port written either as a JSON number or a string, a common
/// inconsistency in hand-edited pool documents.
pub fn port_from_str_or_int<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Int(u16),
        Str(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Int(port) => Ok(port),
        PortRepr::Str(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| serde::de::Error::custom(format!("invalid port '{s}': {e}"))),
    }
}

/// Loads the backend pool from a JSON document and validates every entry.
///
/// The pool order in the document is the rotation order and each endpoint's
/// position is its identity for the process lifetime. A `live` field in the
/// input is ignored; the startup probe sweep decides initial liveness.
pub fn load_endpoints(path: &str) -> Result<Vec<Endpoint>, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
    let endpoints: Vec<Endpoint> = serde_json::from_str(&raw)
        .map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;

    if endpoints.is_empty() {
        return Err(ConfigError::EmptyPool);
    }
    for ep in &endpoints {
        validate_endpoint(ep)?;
    }

    info!(path = %path, count = endpoints.len(), "Loaded endpoint pool");
    Ok(endpoints)
}

/// A malformed address is a configuration error, not a transient network
/// condition, so it aborts startup instead of being folded into "unreachable"
/// by the prober.
fn validate_endpoint(ep: &Endpoint) -> Result<(), ConfigError> {
    let entry = ep.to_string();

    if ep.host.trim().is_empty() {
        return Err(ConfigError::InvalidEndpoint(entry, "empty host".to_string()));
    }
    if ep.host.contains("://") {
        return Err(ConfigError::InvalidEndpoint(
            entry,
            "host must not carry a scheme".to_string(),
        ));
    }
    if ep.host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::InvalidEndpoint(
            entry,
            "host contains whitespace or control characters".to_string(),
        ));
    }
    if ep.port == 0 {
        return Err(ConfigError::InvalidEndpoint(entry, "port must be non-zero".to_string()));
    }

    // Round-trip through a URL parse so anything the forwarder could not
    // target later fails now.
    let url = format!("http://{}/", ep.authority());
    reqwest::Url::parse(&url)
        .map_err(|e| ConfigError::InvalidEndpoint(entry, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pool_doc(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn load(file: &NamedTempFile) -> Result<Vec<Endpoint>, ConfigError> {
        load_endpoints(file.path().to_str().unwrap())
    }

    #[test]
    fn loads_pool_with_int_and_string_ports() {
        let f = pool_doc(
            r#"[{"host": "127.0.0.1", "port": 8080}, {"host": "backend.local", "port": "9090"}]"#,
        );
        let pool = load(&f).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].port, 8080);
        assert_eq!(pool[1].port, 9090);
        assert_eq!(pool[1].authority(), "backend.local:9090");
    }

    #[test]
    fn stale_live_field_in_document_is_ignored_as_input() {
        let f = pool_doc(r#"[{"host": "127.0.0.1", "port": 8080, "live": true}]"#);
        // Parsing succeeds; the startup sweep overwrites the flag regardless.
        let pool = load(&f).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_endpoints("/nonexistent/endpoints.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn unparseable_document_is_fatal() {
        let f = pool_doc("not json at all");
        let err = load(&f).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_pool_is_fatal() {
        let f = pool_doc("[]");
        let err = load(&f).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPool));
    }

    #[test]
    fn malformed_port_is_fatal() {
        let f = pool_doc(r#"[{"host": "127.0.0.1", "port": "eighty"}]"#);
        let err = load(&f).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn host_with_scheme_is_fatal() {
        let f = pool_doc(r#"[{"host": "http://127.0.0.1", "port": 8080}]"#);
        let err = load(&f).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_, _)));
    }

    #[test]
    fn empty_host_and_zero_port_are_fatal() {
        let f = pool_doc(r#"[{"host": " ", "port": 8080}]"#);
        assert!(matches!(load(&f).unwrap_err(), ConfigError::InvalidEndpoint(_, _)));

        let f = pool_doc(r#"[{"host": "127.0.0.1", "port": 0}]"#);
        assert!(matches!(load(&f).unwrap_err(), ConfigError::InvalidEndpoint(_, _)));
    }

    #[test]
    fn duplicate_entries_keep_their_positions() {
        // Identity is positional; the operator's ordered list is authoritative
        // and duplicates are deliberately not collapsed.
        let f = pool_doc(
            r#"[{"host": "127.0.0.1", "port": 8080}, {"host": "127.0.0.1", "port": 8080}]"#,
        );
        let pool = load(&f).unwrap();
        assert_eq!(pool.len(), 2);
    }
}
