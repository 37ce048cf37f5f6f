use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::error;

/// Histogram bucket boundaries for response-time metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL: OnceLock<Metrics> = OnceLock::new();

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering the `/metrics`
/// endpoint and the push payload. The recorder is process-wide; repeated
/// installs return the same handle.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions.
    pub fn install() -> Self {
        GLOBAL
            .get_or_init(|| {
                let handle = PrometheusBuilder::new()
                    .set_buckets_for_metric(
                        Matcher::Full("http_response_time_seconds".to_string()),
                        LATENCY_BUCKETS,
                    )
                    .expect("valid matcher")
                    .install_recorder()
                    .expect("failed to install metrics recorder");

                describe_histogram!(
                    "http_response_time_seconds",
                    Unit::Seconds,
                    "Request response times"
                );
                describe_counter!("http_requests_count", Unit::Count, "Request counter");
                describe_counter!("http_remote_addr", Unit::Count, "Remote addresses counter");
                describe_counter!("http_response_code", Unit::Count, "Response codes counter");
                describe_counter!(
                    "gonvey_connections_total",
                    Unit::Count,
                    "Total connections accepted"
                );

                Metrics { handle }
            })
            .clone()
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

struct PushGateway {
    url: String,
    client: reqwest::Client,
}

/// Telemetry context handed to every forwarder at table-build time.
///
/// Owns the metrics handle and the optional push-gateway target, so the
/// transport records one event per round trip without reaching for hidden
/// globals.
#[derive(Clone)]
pub struct Telemetry {
    metrics: Metrics,
    push: Option<Arc<PushGateway>>,
}

impl Telemetry {
    /// `gateway` is the push gateway base URL; empty keeps export
    /// scrape-only. The push URL groups by hostname so several instances
    /// do not overwrite each other.
    pub fn new(metrics: Metrics, gateway: &str) -> Self {
        let push = if gateway.is_empty() {
            None
        } else {
            let instance = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string());
            let url = format!(
                "{}/metrics/job/gonvey/instance/{}",
                gateway.trim_end_matches('/'),
                instance
            );
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build metrics push client");
            Some(Arc::new(PushGateway { url, client }))
        };

        Self { metrics, push }
    }

    pub fn render(&self) -> String {
        self.metrics.render()
    }

    /// Record one completed upstream round trip: histogram sample, the
    /// three request counters, one structured access log, and a push of
    /// the updated families when a gateway is configured.
    pub fn record_round_trip(
        &self,
        method: &str,
        request_uri: &str,
        endpoint: &str,
        remote_addr: &str,
        status: u16,
        elapsed: Duration,
    ) {
        metrics::histogram!("http_response_time_seconds").record(elapsed.as_secs_f64());

        metrics::counter!(
            "http_requests_count",
            "http_method" => method.to_owned(),
            "http_request_uri" => request_uri.to_owned(),
            "endpoint" => endpoint.to_owned(),
        )
        .increment(1);

        metrics::counter!(
            "http_remote_addr",
            "http_remote_addr" => remote_addr.to_owned(),
        )
        .increment(1);

        metrics::counter!(
            "http_response_code",
            "http_response_code" => status.to_string(),
        )
        .increment(1);

        tracing::info!(
            http_remote_addr = remote_addr,
            http_method = method,
            http_request_uri = request_uri,
            http_request_url = endpoint,
            http_response_code = status,
            http_request_duration_ms = elapsed.as_millis() as u64,
            "request proxied"
        );

        self.push_families();
    }

    /// Push the rendered registry to the gateway in a detached task. A
    /// push failure is logged and swallowed; it never reaches the
    /// response path.
    fn push_families(&self) {
        let Some(push) = &self.push else { return };
        let push = push.clone();
        let body = self.metrics.render();

        tokio::spawn(async move {
            let result = push
                .client
                .put(&push.url)
                .header("content-type", "text/plain; version=0.0.4")
                .body(body)
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    error!(
                        "metrics: could not push to gateway, status={}",
                        resp.status()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("metrics: could not push to gateway, error={}", e);
                }
            }
        });
    }
}
