use crate::config::Config;
use crate::metrics::{Metrics, Telemetry};
use crate::routing::RouteTable;
use crate::upstream::{self, HttpClient};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared proxy state, cheaply cloneable.
///
/// The configuration and routing table are immutable snapshots behind
/// `ArcSwap`: request workers read lock-free, the config watcher is the
/// only writer. A request holds the snapshot it loaded until it
/// completes, so a swap never affects requests already in flight.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ArcSwap<Config>>,
    pub table: Arc<ArcSwap<RouteTable>>,
    pub telemetry: Telemetry,
    /// Shared upstream client; forwarders in every table generation reuse
    /// its connection pool.
    pub client: HttpClient,
}

impl ProxyState {
    pub fn new(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new(Metrics::install(), &config.metrics_gateway);
        let client = upstream::build_http_client();
        let table = RouteTable::build(&config.proxy_map, &client, &telemetry)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            table: Arc::new(ArcSwap::from_pointee(table)),
            telemetry,
            client,
        })
    }

    /// Install a fully built configuration and routing table. Both are
    /// complete before either store, so no request ever observes a
    /// half-constructed generation.
    pub fn install(&self, config: Config, table: RouteTable) {
        self.table.store(Arc::new(table));
        self.config.store(Arc::new(config));
    }
}
