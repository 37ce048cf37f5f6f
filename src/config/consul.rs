//! Minimal consul KV client: versioned reads with long-poll semantics,
//! plus writes for the startup write-through.

use crate::error::ProxyError;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

/// Long-poll wait passed to consul. The client timeout below must stay
/// above it.
const WAIT: &str = "55s";

/// A single entry from the `/v1/kv/{key}` response.
#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

/// Consul KV HTTP client.
#[derive(Clone)]
pub struct ConsulKv {
    base_url: String,
    client: reqwest::Client,
}

impl ConsulKv {
    pub fn new(consul_addr: &str) -> Self {
        let base_url = if consul_addr.starts_with("http://") || consul_addr.starts_with("https://")
        {
            consul_addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", consul_addr.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(70))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build consul HTTP client");

        Self { base_url, client }
    }

    /// Read one key. With a wait index the call blocks server-side until
    /// the key's `ModifyIndex` advances past it or the wait elapses, in
    /// which case the unchanged value comes back with the same index.
    /// Returns `None` when the key does not exist.
    pub async fn get(
        &self,
        key: &str,
        wait_index: Option<u64>,
    ) -> Result<Option<(String, u64)>, ProxyError> {
        let mut url = format!("{}/v1/kv/{}", self.base_url, key);
        if let Some(index) = wait_index {
            url.push_str(&format!("?index={}&wait={}", index, WAIT));
        }

        let resp = self.client.get(&url).send().await.map_err(ProxyError::Http)?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ProxyError::ConfigSource(format!(
                "consul kv get {}: status={}",
                key,
                resp.status()
            )));
        }

        let pairs: Vec<KvPair> = resp.json().await.map_err(ProxyError::Http)?;
        let Some(pair) = pairs.into_iter().next() else {
            return Ok(None);
        };

        let value = match &pair.value {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    ProxyError::ConfigSource(format!(
                        "consul kv get {}: value is not base64-encoded utf-8",
                        key
                    ))
                })?,
            None => String::new(),
        };

        Ok(Some((value, pair.modify_index)))
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), ProxyError> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);

        let resp = self
            .client
            .put(&url)
            .body(value.to_string())
            .send()
            .await
            .map_err(ProxyError::Http)?;

        if !resp.status().is_success() {
            return Err(ProxyError::ConfigSource(format!(
                "consul kv put {}: status={}",
                key,
                resp.status()
            )));
        }

        Ok(())
    }
}
