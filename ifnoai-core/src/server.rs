//! Listener management for the sinkhole.
//!
//! One accept loop runs per bound (port, address family) pair. Loops are
//! stopped through a watch channel raced against `accept()`, so `stop()` does
//! not depend on a connection arriving to wake a blocked listener.

use crate::connection::{ConnectionHandler, Protocol};
use crate::metrics::SinkholeMetrics;
use crate::stats::{StatsSnapshot, StatsStore};
use futures::future::join_all;
use ifnoai_config::Config;
use prometheus::Registry;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

/// Pause after a failed `accept()`, so EMFILE and similar errors do not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A listener that is currently accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerEndpoint {
    pub local_addr: SocketAddr,
    pub protocol: Protocol,
}

struct RunningState {
    shutdown_tx: watch::Sender<bool>,
    accept_loops: Vec<JoinHandle<()>>,
    endpoints: Vec<ListenerEndpoint>,
}

/// Loopback sinkhole: accepts redirected connections on the HTTP and HTTPS
/// ports, counts them and refuses them.
///
/// Statistics belong to the server instance and accumulate over any number of
/// `start`/`stop` cycles.
pub struct SinkholeServer {
    config: Arc<Config>,
    stats: Arc<StatsStore>,
    handler: ConnectionHandler,
    metrics: Option<Arc<SinkholeMetrics>>,
    running: Arc<AtomicBool>,
    state: Mutex<Option<RunningState>>,
}

impl SinkholeServer {
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Like [`SinkholeServer::new`], with collectors registered into `registry`.
    pub fn with_metrics(config: Config, registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = SinkholeMetrics::new(registry)?;
        Ok(Self::build(config, Some(Arc::new(metrics))))
    }

    fn build(config: Config, metrics: Option<Arc<SinkholeMetrics>>) -> Self {
        let stats = Arc::new(StatsStore::new());
        let handler = ConnectionHandler::new(&config, stats.clone(), metrics.clone());

        Self {
            config: Arc::new(config),
            stats,
            handler,
            metrics,
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(None),
        }
    }

    /// Binds every loopback listener and starts its accept loop. Does nothing
    /// if the server is already running.
    ///
    /// Bind failures never abort the start: IPv6 failures are expected on
    /// hosts without an IPv6 stack and only logged at debug level, IPv4
    /// failures are logged as warnings. The remaining listeners run normally.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            debug!("Sinkhole already running");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut accept_loops = Vec::new();
        let mut endpoints = Vec::new();

        for protocol in [Protocol::Http, Protocol::Https] {
            let port = protocol.port(&self.config);
            for addr in self.loopback_addrs(port) {
                let listener = match bind_loopback(addr, self.config.backlog) {
                    Ok(listener) => listener,
                    Err(e) if addr.is_ipv6() => {
                        debug!(%addr, error = %e, "IPv6 listener unavailable, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "Failed to bind listener");
                        continue;
                    }
                };

                let endpoint = ListenerEndpoint {
                    local_addr: listener.local_addr().unwrap_or(addr),
                    protocol,
                };
                info!(
                    addr = %endpoint.local_addr,
                    protocol = protocol.as_str(),
                    "Sinkhole listening"
                );

                accept_loops.push(tokio::spawn(accept_loop(
                    listener,
                    endpoint,
                    self.handler.clone(),
                    self.running.clone(),
                    shutdown_rx.clone(),
                    self.metrics.clone(),
                )));
                endpoints.push(endpoint);
            }
        }

        if endpoints.is_empty() {
            warn!("No sinkhole listener could be bound");
        }

        *state = Some(RunningState {
            shutdown_tx,
            accept_loops,
            endpoints,
        });
    }

    /// Stops every accept loop and waits for them to exit. Safe to call when
    /// the server was never started or is already stopped.
    ///
    /// Connections already being handled are left to finish on their own;
    /// each is bounded by the read timeout.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.running.store(false, Ordering::SeqCst);

        let Some(current) = state.take() else {
            return;
        };

        // Receivers only error once every loop has already exited
        let _ = current.shutdown_tx.send(true);

        for result in join_all(current.accept_loops).await {
            if let Err(e) = result {
                warn!(error = %e, "Accept loop terminated abnormally");
            }
        }

        info!(
            listeners = current.endpoints.len(),
            total_hits = self.stats.total(),
            "Sinkhole stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Listeners of the current run; empty while stopped.
    pub async fn endpoints(&self) -> Vec<ListenerEndpoint> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.endpoints.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> Arc<StatsStore> {
        self.stats.clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn loopback_addrs(&self, port: u16) -> Vec<SocketAddr> {
        let mut addrs = vec![SocketAddr::from((Ipv4Addr::LOCALHOST, port))];
        if self.config.ipv6 {
            addrs.push(SocketAddr::from((Ipv6Addr::LOCALHOST, port)));
        }
        addrs
    }
}

fn bind_loopback(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    debug_assert!(addr.ip().is_loopback());

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

async fn accept_loop(
    listener: TcpListener,
    endpoint: ListenerEndpoint,
    handler: ConnectionHandler,
    running: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: Option<Arc<SinkholeMetrics>>,
) {
    if let Some(ref metrics) = metrics {
        metrics.listeners_active.inc();
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            result = listener.accept() => match result {
                Ok((socket, peer)) => {
                    if !running.load(Ordering::SeqCst) {
                        drop(socket);
                        break;
                    }

                    let handler = handler.clone();
                    let protocol = endpoint.protocol;
                    tokio::spawn(async move {
                        handler.handle_connection(socket, peer, protocol).await;
                    });
                }
                Err(e) => {
                    warn!(addr = %endpoint.local_addr, error = %e, "Accept error");
                    if accept_error_backoff(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }
    }

    drop(listener);
    if let Some(ref metrics) = metrics {
        metrics.listeners_active.dec();
    }
    debug!(addr = %endpoint.local_addr, "Listener closed");
}

/// Waits out [`ACCEPT_ERROR_BACKOFF`]. Returns `true` if shutdown was
/// signalled in the meantime.
async fn accept_error_backoff(shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => true,
        _ = sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}
