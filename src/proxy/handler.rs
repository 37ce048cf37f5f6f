use crate::proxy::body::{full_body, status_response, BoxBody};
use crate::server::ProxyState;
use crate::upstream::loadbalance;
use http::{HeaderName, HeaderValue, StatusCode};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use tracing::{error, warn};

static PROXY_HEADER: HeaderName = HeaderName::from_static("x-gonvey");
static PROXY_HEADER_VALUE: HeaderValue = HeaderValue::from_static("Gonvey");

/// Handle one incoming request:
///
/// 1. `/metrics` short-circuits to the scrape render, bypassing routing.
/// 2. Split the URI against the current routing table.
/// 3. Pick one backend from the mount's pool, uniformly at random.
/// 4. Forward with the path rewritten to the residual.
///
/// Every response carries the `X-Gonvey` header, including 404s, 502s and
/// scrape output.
pub async fn handle_request(
    req: Request<Incoming>,
    state: ProxyState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let mut resp = dispatch(req, &state, peer_addr).await;
    resp.headers_mut()
        .insert(PROXY_HEADER.clone(), PROXY_HEADER_VALUE.clone());
    Ok(resp)
}

async fn dispatch(
    req: Request<Incoming>,
    state: &ProxyState,
    peer_addr: SocketAddr,
) -> Response<BoxBody> {
    if req.uri().path() == "/metrics" {
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(state.telemetry.render()))
            .unwrap();
    }

    // The snapshot is held for the whole request; a concurrent swap does
    // not affect requests already being served.
    let table = state.table.load_full();

    let (mount, residual) = {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        match table.split(path_and_query) {
            Ok(split) => split,
            Err(_) => {
                error!(
                    http_request_uri = path_and_query,
                    "no mount point matches request path"
                );
                return status_response(StatusCode::NOT_FOUND);
            }
        }
    };

    let Some(forwarder) = loadbalance::pick(mount.pool()) else {
        // Unreachable while the table invariant holds: pools are non-empty.
        warn!(mount = mount.prefix(), "mount point has no backends");
        return status_response(StatusCode::BAD_GATEWAY);
    };

    forwarder.forward(req, &residual, peer_addr).await
}
