use crate::config::consul::ConsulKv;
use crate::config::{registry, watch, CliOverrides, Config};
use crate::logging;
use crate::server::{self, ProxyState};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub overrides: CliOverrides,
}

/// Proxy lifecycle: logging → config → seed → watchers → serve → drain.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let log_handle = logging::init();
    info!("gonvey is starting up");

    let config = Config::load(&args.overrides).context("invalid startup configuration")?;
    log_handle
        .set_level(&config.log_level)
        .context("invalid startup configuration")?;
    config.log();

    let consul = ConsulKv::new(&config.consul_address);

    // Write-through: after first publication the source is authoritative.
    // An unreachable source is not fatal here; the watchers keep
    // retrying against it.
    if let Err(e) = registry::seed(&consul, &config).await {
        error!(
            "config: could not publish configuration to consul, error={}",
            e
        );
    }

    let state = ProxyState::new(config).context("invalid startup configuration")?;

    let shutdown = Arc::new(Notify::new());
    let restart = Arc::new(Notify::new());

    watch::spawn_watchers(
        state.clone(),
        consul,
        log_handle,
        restart.clone(),
        shutdown.clone(),
    );

    let mut server_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        let restart = restart.clone();
        async move { server::run_proxy_server(state, shutdown, restart).await }
    });

    info!("gonvey is up");

    tokio::select! {
        result = &mut server_handle => {
            // The listener died without a shutdown request.
            shutdown.notify_waiters();
            result.context("server task panicked")??;
            anyhow::bail!("server stopped unexpectedly");
        }
        _ = wait_for_signal() => {
            info!("gonvey is shutting down");
            shutdown.notify_waiters();
        }
    }

    // Wait for the server to finish draining.
    server_handle.await.context("server task panicked")??;

    info!("gonvey shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
    }
}
