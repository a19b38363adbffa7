//! Reachability probing for a single endpoint.
//!
//! The probe is a bounded-time TCP connect: a backend that accepts a
//! connection is considered reachable, and every failure mode at the
//! connection layer (refused, timed out, DNS miss) folds into "unreachable".
//! This is the only blocking network I/O in the health path, so the timeout
//! bound is what keeps one unresponsive endpoint from stalling a whole sweep.
//! Malformed addresses never reach this function; configuration validation
//! rejects them at startup.

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// Dials `host:port` over TCP within `timeout` and reports reachability.
/// Stateless; nothing is retained between calls.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    let attempt = TcpStream::connect((host, port));
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            trace!(host = %host, port = port, error = %e, "Probe connect failed");
            false
        }
        Err(_) => {
            trace!(host = %host, port = port, timeout = ?timeout, "Probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_socket_probes_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_probes_unreachable() {
        // Bind to grab a free port, then drop the listener so the connect is
        // refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn unresolvable_host_probes_unreachable() {
        assert!(!probe("host.invalid", 80, Duration::from_secs(1)).await);
    }
}
