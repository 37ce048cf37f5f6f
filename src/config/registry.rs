//! Explicit configuration-key registry.
//!
//! Each entry couples a consul KV key with its watch/restart
//! classification and the string codec for the field it populates.
//! Iterating `KEYS` drives seeding, full re-reads, and the watch loops.

use super::consul::ConsulKv;
use super::{encode_proxy_map, parse_proxy_map, Config};
use crate::error::ProxyError;

pub struct KeyDef {
    pub key: &'static str,
    /// Subscribed to at runtime; non-watched keys are read once at startup.
    pub watched: bool,
    /// A change rebuilds the routing table and restarts the listener
    /// instead of applying in place.
    pub restart: bool,
    pub decode: fn(&mut Config, &str) -> Result<(), ProxyError>,
    pub encode: fn(&Config) -> String,
}

pub const KEYS: &[KeyDef] = &[
    KeyDef {
        key: "log_level",
        watched: true,
        restart: false,
        decode: decode_log_level,
        encode: encode_log_level,
    },
    KeyDef {
        key: "server_port",
        watched: false,
        restart: false,
        decode: decode_server_port,
        encode: encode_server_port,
    },
    KeyDef {
        key: "proxy_map",
        watched: true,
        restart: true,
        decode: decode_proxy_map,
        encode: encode_proxy_map_field,
    },
];

fn decode_log_level(config: &mut Config, raw: &str) -> Result<(), ProxyError> {
    config.log_level = raw.to_string();
    Ok(())
}

fn encode_log_level(config: &Config) -> String {
    config.log_level.clone()
}

fn decode_server_port(config: &mut Config, raw: &str) -> Result<(), ProxyError> {
    config.server_port = raw
        .parse()
        .map_err(|_| ProxyError::ConfigInvalid(format!("server_port is not a port number: {raw}")))?;
    Ok(())
}

fn encode_server_port(config: &Config) -> String {
    config.server_port.to_string()
}

fn decode_proxy_map(config: &mut Config, raw: &str) -> Result<(), ProxyError> {
    config.proxy_map = parse_proxy_map(raw)?;
    Ok(())
}

fn encode_proxy_map_field(config: &Config) -> String {
    encode_proxy_map(&config.proxy_map)
}

/// Write-through every registry key so the source becomes authoritative
/// after first publication.
pub async fn seed(consul: &ConsulKv, config: &Config) -> Result<(), ProxyError> {
    for def in KEYS {
        let value = (def.encode)(config);
        consul.put(def.key, &value).await?;
        tracing::info!(key = def.key, "config: published to consul");
    }
    Ok(())
}

/// Re-read the whole configuration aggregate from the source. Fields not
/// backed by a registry key (startup-only infrastructure settings) keep
/// their values from `base`.
pub async fn fetch(consul: &ConsulKv, base: &Config) -> Result<Config, ProxyError> {
    let mut config = base.clone();
    for def in KEYS {
        let (value, _) = consul.get(def.key, None).await?.ok_or_else(|| {
            ProxyError::ConfigSource(format!("consul key '{}' cannot be found", def.key))
        })?;
        (def.decode)(&mut config, &value)?;
    }
    Ok(config)
}
