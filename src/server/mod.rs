pub mod bootstrap;
mod state;

pub use state::ProxyState;

use crate::proxy;
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info};

/// How long in-flight connections get to finish once the listener stops
/// accepting; whatever is still running afterwards is aborted.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

enum ServeOutcome {
    Shutdown,
    Restart,
}

/// Run the proxy server until `shutdown` is signalled.
///
/// A `restart` signal drains the current listener and rebinds with the
/// already-swapped state. The watcher installs the new routing table
/// before signalling, so no accept ever reaches a half-configured
/// handler.
pub async fn run_proxy_server(
    state: ProxyState,
    shutdown: Arc<Notify>,
    restart: Arc<Notify>,
) -> Result<()> {
    loop {
        match serve_once(&state, &shutdown, &restart).await? {
            ServeOutcome::Shutdown => return Ok(()),
            ServeOutcome::Restart => {
                info!("server: restarting with new routing table");
            }
        }
    }
}

async fn serve_once(
    state: &ProxyState,
    shutdown: &Notify,
    restart: &Notify,
) -> Result<ServeOutcome> {
    let port = state.config.load().server_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!("server: proxy listening, addr={}", addr);

    let mut conns: JoinSet<()> = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(v) => {
                        metrics::counter!(
                            "gonvey_connections_total",
                            "status" => "accepted",
                        )
                        .increment(1);
                        v
                    }
                    Err(e) => {
                        error!("server: accept failed, error={}", e);
                        metrics::counter!(
                            "gonvey_connections_total",
                            "status" => "error",
                        )
                        .increment(1);
                        continue;
                    }
                };

                let state = state.clone();
                conns.spawn(serve_connection(stream, peer_addr, state));
            }
            _ = shutdown.notified() => break ServeOutcome::Shutdown,
            _ = restart.notified() => break ServeOutcome::Restart,
            // Reap finished connection tasks so the set does not grow
            // unbounded under keep-alive churn.
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    };

    // Stop accepting before draining: dropping the listener closes the
    // accept socket, so a restart can rebind the same port.
    drop(listener);
    drain(conns).await;

    Ok(outcome)
}

async fn serve_connection(stream: TcpStream, peer_addr: SocketAddr, state: ProxyState) {
    let io = TokioIo::new(stream);
    let state_inner = state.clone();
    let svc = service_fn(move |req: Request<Incoming>| {
        let state = state_inner.clone();
        async move { proxy::handle_request(req, state, peer_addr).await }
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .http1()
        .keep_alive(true)
        .http2()
        .keep_alive_interval(Some(Duration::from_secs(20)))
        .serve_connection_with_upgrades(io, svc)
        .await
    {
        if !e.to_string().contains("connection closed") {
            error!(
                "server: connection error, peer={}, error={}",
                peer_addr, e
            );
        }
    }
}

/// Wait up to `DRAIN_TIMEOUT` for in-flight connections, then abort
/// whatever is left. Aborted clients see a connection reset.
async fn drain(mut conns: JoinSet<()>) {
    let active = conns.len();
    if active == 0 {
        return;
    }

    info!("server: waiting for {} active connections to drain", active);
    let result = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while conns.join_next().await.is_some() {}
    })
    .await;

    match result {
        Ok(_) => info!("server: all connections drained"),
        Err(_) => {
            info!(
                "server: drain timeout ({}s), aborting {} connections",
                DRAIN_TIMEOUT.as_secs(),
                conns.len()
            );
            conns.abort_all();
        }
    }
}
