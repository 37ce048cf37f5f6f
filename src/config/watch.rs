//! Per-key watch loops driving hot apply and listener restart.

use super::consul::ConsulKv;
use super::registry::{self, KeyDef};
use crate::logging::LogHandle;
use crate::routing::RouteTable;
use crate::server::ProxyState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

/// Backoff after the source errors or a key is missing.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct WatchContext {
    state: ProxyState,
    consul: ConsulKv,
    log_handle: LogHandle,
    restart: Arc<Notify>,
    /// Serializes update application across the per-key loops, so two
    /// concurrent advances cannot interleave their read-modify-write.
    apply_mu: Arc<Mutex<()>>,
}

/// Spawn one long-poll loop per watched registry key. The loops never
/// exit on errors; they back off and retry until shutdown.
pub fn spawn_watchers(
    state: ProxyState,
    consul: ConsulKv,
    log_handle: LogHandle,
    restart: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let ctx = WatchContext {
        state,
        consul,
        log_handle,
        restart,
        apply_mu: Arc::new(Mutex::new(())),
    };

    for def in registry::KEYS.iter().filter(|d| d.watched) {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            watch_key(def, ctx, shutdown).await;
        });
    }
}

async fn watch_key(def: &'static KeyDef, ctx: WatchContext, shutdown: Arc<Notify>) {
    let mut wait_index: Option<u64> = None;

    loop {
        let polled = tokio::select! {
            result = ctx.consul.get(def.key, wait_index) => result,
            _ = shutdown.notified() => return,
        };

        match polled {
            Ok(Some((_, modify_index))) => {
                if wait_index == Some(modify_index) {
                    // The wait elapsed with no change.
                    continue;
                }
                wait_index = Some(modify_index);
                apply_update(def, &ctx).await;
            }
            Ok(None) => {
                error!(key = def.key, "config: consul key cannot be found");
                wait_index = None;
                if sleep_or_shutdown(RETRY_INTERVAL, &shutdown).await {
                    return;
                }
            }
            Err(e) => {
                error!(key = def.key, error = %e, "config: consul watch failed");
                wait_index = None;
                if sleep_or_shutdown(RETRY_INTERVAL, &shutdown).await {
                    return;
                }
            }
        }
    }
}

/// Re-read the whole aggregate, validate, and either hot-apply or install
/// a new routing table and ask the supervisor to restart. An update that
/// fails anywhere is discarded; the previous configuration stays active.
async fn apply_update(def: &'static KeyDef, ctx: &WatchContext) {
    let _guard = ctx.apply_mu.lock().await;

    let current = ctx.state.config.load_full();

    let config = match registry::fetch(&ctx.consul, &current).await {
        Ok(c) => c,
        Err(e) => {
            error!(
                key = def.key,
                error = %e,
                "config: update discarded, could not re-read configuration"
            );
            return;
        }
    };

    if let Err(e) = config.validate() {
        error!(key = def.key, error = %e, "config: update discarded, validation failed");
        return;
    }

    if config == *current {
        debug!(key = def.key, "config: update is a no-op");
        return;
    }

    if def.restart {
        let table = match RouteTable::build(
            &config.proxy_map,
            &ctx.state.client,
            &ctx.state.telemetry,
        ) {
            Ok(t) => t,
            Err(e) => {
                error!(
                    key = def.key,
                    error = %e,
                    "config: update discarded, routing table rejected"
                );
                return;
            }
        };

        // The new level rides along with a restart-class update.
        if let Err(e) = ctx.log_handle.set_level(&config.log_level) {
            error!(key = def.key, error = %e, "config: could not apply log level");
        }

        info!(
            key = def.key,
            mounts = table.len(),
            "config: new routing table built, restarting server"
        );
        ctx.state.install(config, table);
        ctx.restart.notify_one();
    } else {
        if let Err(e) = ctx.log_handle.set_level(&config.log_level) {
            error!(
                key = def.key,
                error = %e,
                "config: update discarded, could not apply log level"
            );
            return;
        }

        // Hot apply touches only this key's field; a routing-table change
        // observed in the same read is left for the proxy_map watcher, so
        // the installed config never runs ahead of the installed table.
        let mut applied = (*current).clone();
        applied.log_level = config.log_level.clone();
        info!(log_level = %applied.log_level, "config: log level updated");
        ctx.state.config.store(Arc::new(applied));
    }
}

/// Sleep for `duration`, returning `true` immediately if shutdown is
/// signalled first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}
