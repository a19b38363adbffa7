//! Dispatch and failover: the per-request protocol that couples forwarding to
//! liveness state.
//!
//! Each inbound request asks the registry for the next endpoint in rotation,
//! forwards through the shared HTTP client, and on a transport-level failure
//! marks that endpoint dead and retries against the next one. The retry is an
//! explicit loop bounded by the pool size, so worst-case latency per request
//! is deterministic and the call stack stays flat no matter how many
//! endpoints fail. Backend responses of any status are relayed verbatim; only
//! failures to obtain a response at all trigger failover.

use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{info, warn};

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::metrics::{
    BAD_GATEWAY_TOTAL, FAILOVER_RETRIES, FORWARD_LATENCY, PROXY_FORWARD_ERRORS,
    PROXY_REQUESTS_FORWARDED, PROXY_REQUESTS_TOTAL,
};

/// Hop-by-hop headers are meaningful per connection and must not be relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Dispatches one inbound request, failing over across the pool.
///
/// Terminal outcomes: the first backend response obtained (relayed verbatim),
/// or 502 Bad Gateway once no live endpoint remains. The 502 path never
/// touches the transport.
pub async fn dispatch(
    balancer: &LoadBalancer,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    PROXY_REQUESTS_TOTAL.inc();

    let max_attempts = balancer.registry.len();
    for attempt in 0..max_attempts {
        let Some(index) = balancer.registry.advance() else {
            // Rotation found nothing live; fail fast.
            BAD_GATEWAY_TOTAL.inc();
            return bad_gateway();
        };

        let endpoint = balancer.registry.endpoint(index);
        let backend = endpoint.authority();
        if attempt > 0 {
            FAILOVER_RETRIES.inc();
        }

        let timer = FORWARD_LATENCY.with_label_values(&[&backend]).start_timer();
        match forward_once(balancer, &endpoint, method.clone(), &uri, &headers, body.clone()).await
        {
            Ok(response) => {
                timer.observe_duration();
                PROXY_REQUESTS_FORWARDED.with_label_values(&[&backend]).inc();
                info!(
                    backend = %backend,
                    index = index,
                    status = %response.status(),
                    "Forwarded request"
                );
                return response;
            }
            Err(e) => {
                timer.observe_duration();
                PROXY_FORWARD_ERRORS.with_label_values(&[&backend]).inc();
                warn!(
                    backend = %backend,
                    index = index,
                    attempt = attempt + 1,
                    error = %e,
                    "Forward failed, marking endpoint dead"
                );
                balancer.registry.set_dead(index);
            }
        }
    }

    // Every attempt failed and marked its endpoint dead on the way out.
    BAD_GATEWAY_TOTAL.inc();
    bad_gateway()
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Bad Gateway.").into_response()
}

/// One forwarding attempt against one backend.
///
/// The request's target host is rewritten to the backend, hop-by-hop headers
/// are stripped in both directions, and the caller-visible Host is recorded in
/// `X-Forwarded-Host`. Any transport-level error (connect refused, timeout,
/// reset mid-body) propagates to the caller for failover.
async fn forward_once(
    balancer: &LoadBalancer,
    endpoint: &Endpoint,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, reqwest::Error> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", endpoint.base_url(), path_and_query);

    let mut outbound = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || *name == header::HOST {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    if let Some(host) = headers.get(header::HOST) {
        outbound.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }

    let upstream = balancer
        .client
        .request(method, url)
        .headers(outbound)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    let bytes = upstream.bytes().await?;

    Ok((status, response_headers, bytes).into_response())
}
