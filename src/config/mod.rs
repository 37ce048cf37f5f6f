pub mod consul;
pub mod registry;
pub mod watch;

#[cfg(test)]
mod tests;

use crate::error::ProxyError;
use crate::logging;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing table wire form: mount point → backend URL pool. A `BTreeMap`
/// keeps the canonical JSON encoding stable, so encoding then parsing
/// round-trips and identical tables compare equal.
pub type ProxyMap = BTreeMap<String, Vec<String>>;

pub const DEFAULT_LOG_LEVEL: &str = "DEBUG";
pub const DEFAULT_SERVER_PORT: u16 = 8888;
pub const DEFAULT_CONSUL_ADDRESS: &str = "config:8500";

/// Flags parsed by `main()`; each one shadows the matching `GONVEY_*`
/// environment variable.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub proxy_map: Option<String>,
    pub consul_address: Option<String>,
    pub metrics_gateway: Option<String>,
}

/// The proxy configuration. An installed `Config` is an immutable
/// snapshot; the watcher replaces the whole value on updates, so
/// `PartialEq` is what detects a no-op update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub server_port: u16,
    pub proxy_map: ProxyMap,
    /// Startup-only: address of the consul agent backing dynamic
    /// configuration.
    pub consul_address: String,
    /// Startup-only: prometheus push gateway base URL; empty keeps metrics
    /// export scrape-only.
    pub metrics_gateway: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            proxy_map: ProxyMap::new(),
            consul_address: DEFAULT_CONSUL_ADDRESS.to_string(),
            metrics_gateway: String::new(),
        }
    }
}

impl Config {
    /// Defaults ← environment ← command line, then validation.
    pub fn load(overrides: &CliOverrides) -> Result<Self, ProxyError> {
        let mut config = Config::default();
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, injectable for tests.
    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ProxyError> {
        if let Some(v) = get("GONVEY_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("GONVEY_SERVER_PORT") {
            self.server_port = v.parse().map_err(|_| {
                ProxyError::ConfigInvalid(format!("GONVEY_SERVER_PORT is not a port number: {v}"))
            })?;
        }
        if let Some(v) = get("GONVEY_PROXY_MAP") {
            self.proxy_map = parse_proxy_map(&v)?;
        }
        if let Some(v) = get("GONVEY_CONSUL_ADDRESS") {
            self.consul_address = v;
        }
        if let Some(v) = get("GONVEY_METRICS_GATEWAY") {
            self.metrics_gateway = v;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ProxyError> {
        if let Some(v) = &overrides.log_level {
            self.log_level = v.clone();
        }
        if let Some(v) = overrides.port {
            self.server_port = v;
        }
        if let Some(v) = &overrides.proxy_map {
            self.proxy_map = parse_proxy_map(v)?;
        }
        if let Some(v) = &overrides.consul_address {
            self.consul_address = v.clone();
        }
        if let Some(v) = &overrides.metrics_gateway {
            self.metrics_gateway = v.clone();
        }
        Ok(())
    }

    /// Field-level validation. Mount and backend invariants are enforced
    /// when the routing table is built from `proxy_map`.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if logging::parse_level(&self.log_level).is_none() {
            return Err(ProxyError::ConfigInvalid(format!(
                "log_level must be one of DEBUG, INFO, WARNING, ERROR, FATAL, got {:?}",
                self.log_level
            )));
        }
        if self.server_port == 0 {
            return Err(ProxyError::ConfigInvalid(
                "server_port must be non-zero".to_string(),
            ));
        }
        if self.consul_address.is_empty() {
            return Err(ProxyError::ConfigInvalid(
                "consul_address must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Print the active configuration.
    pub fn log(&self) {
        tracing::debug!(
            log_level = %self.log_level,
            server_port = self.server_port,
            proxy_map = %encode_proxy_map(&self.proxy_map),
            consul_address = %self.consul_address,
            "configuration"
        );
    }
}

pub fn parse_proxy_map(raw: &str) -> Result<ProxyMap, ProxyError> {
    serde_json::from_str(raw)
        .map_err(|e| ProxyError::ConfigInvalid(format!("proxy_map is not valid JSON: {e}")))
}

/// The canonical JSON encoding of a proxy map, as stored under the
/// watched `proxy_map` key.
pub fn encode_proxy_map(map: &ProxyMap) -> String {
    serde_json::to_string(map).expect("a proxy map always encodes")
}
