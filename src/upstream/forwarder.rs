use crate::error::ProxyError;
use crate::metrics::Telemetry;
use crate::proxy::body::{status_response, BoxBody};
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::uri::{Authority, Scheme};
use http::{HeaderName, HeaderValue, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::error;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

/// Build the shared upstream HTTP client. Wraps an `HttpsConnector` so
/// that both `http://` and `https://` backends are supported; HTTP/2 is
/// negotiated via ALPN on TLS connections. One client (one connection
/// pool) is shared by every forwarder.
pub fn build_http_client() -> HttpClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(60))
        .build(https)
}

/// A single-backend forwarder: rewrites a request to its backend's
/// scheme/authority and executes it through the instrumented transport.
///
/// One forwarder per backend target, constructed at table-build time and
/// reused for every request the load balancer sends its way.
pub struct Forwarder {
    scheme: Scheme,
    authority: Authority,
    /// Base path from the backend URL, trailing `/` trimmed; usually empty.
    base_path: String,
    client: HttpClient,
    telemetry: Telemetry,
}

impl Forwarder {
    pub fn new(url: &str, client: HttpClient, telemetry: Telemetry) -> Result<Self, ProxyError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ProxyError::ConfigInvalid(format!("backend url {:?}: {}", url, e)))?;

        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| ProxyError::ConfigInvalid(format!("backend url {:?} has no scheme", url)))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(ProxyError::ConfigInvalid(format!(
                "backend url {:?} must be http or https",
                url
            )));
        }

        let authority = uri.authority().cloned().ok_or_else(|| {
            ProxyError::ConfigInvalid(format!("backend url {:?} has no authority", url))
        })?;

        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            scheme,
            authority,
            base_path,
            client,
            telemetry,
        })
    }

    /// Execute one upstream round trip with the request's path replaced by
    /// `residual`. The original request URI survives only in telemetry.
    ///
    /// On success the upstream response is returned verbatim; on transport
    /// error one error log is emitted and the caller gets a bare
    /// `502 Bad Gateway`. No retries.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        residual: &str,
        remote_addr: SocketAddr,
    ) -> Response<BoxBody> {
        let method = req.method().clone();
        let request_uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());

        let (parts, body) = req.into_parts();

        let mut path_and_query = String::with_capacity(self.base_path.len() + residual.len());
        path_and_query.push_str(&self.base_path);
        path_and_query.push_str(residual);

        let target = match Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query.as_str())
            .build()
        {
            Ok(uri) => uri,
            Err(e) => {
                error!(
                    http_request_uri = %request_uri,
                    error = %e,
                    "proxy: could not build upstream uri"
                );
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let target_url = target.to_string();

        let mut headers = parts.headers;
        remove_hop_headers(&mut headers);
        match HeaderValue::from_str(self.authority.as_str()) {
            Ok(host) => {
                headers.insert(HOST, host);
            }
            Err(_) => {
                headers.remove(HOST);
            }
        }
        append_forwarded_for(&mut headers, remote_addr);

        let mut builder = Request::builder().method(parts.method).uri(target);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        let upstream_req = match builder.body(body.boxed()) {
            Ok(r) => r,
            Err(e) => {
                error!(
                    http_request_uri = %request_uri,
                    error = %e,
                    "proxy: could not build upstream request"
                );
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let start = Instant::now();
        match self.client.request(upstream_req).await {
            Ok(resp) => {
                let elapsed = start.elapsed();
                let status = resp.status().as_u16();

                // Telemetry fires after upstream headers arrive and before
                // the response reaches the client.
                self.telemetry.record_round_trip(
                    method.as_str(),
                    &request_uri,
                    &target_url,
                    &remote_addr.to_string(),
                    status,
                    elapsed,
                );

                build_downstream_response(resp)
            }
            Err(e) => {
                error!(
                    http_method = %method,
                    http_remote_addr = %remote_addr,
                    http_request_uri = %request_uri,
                    http_request_url = %target_url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "endpoint not reachable"
                );
                status_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

fn build_downstream_response(upstream_resp: Response<Incoming>) -> Response<BoxBody> {
    let (parts, body) = upstream_resp.into_parts();
    let mut builder = Response::builder().status(parts.status);
    for (name, value) in &parts.headers {
        builder = builder.header(name, value);
    }
    builder.body(body.boxed()).unwrap()
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in hop_headers {
        headers.remove(h);
    }
}

/// Append the TCP peer IP to `X-Forwarded-For` (comma-separated list per
/// RFC 7239 semantics), so backends can identify the original client.
fn append_forwarded_for(headers: &mut http::HeaderMap, peer_addr: SocketAddr) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");

    let peer_ip = peer_addr.ip().to_string();
    let combined = match headers.get(&XFF).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, peer_ip),
        None => peer_ip,
    };

    if let Ok(v) = HeaderValue::from_str(&combined) {
        headers.insert(XFF.clone(), v);
    }
}
