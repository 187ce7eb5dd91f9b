//! Listener lifecycle for the gateway.
//!
//! A [`Gateway`] owns the shared core (config store, request log, upstream
//! client) and starts/stops the network listener that makes the router
//! reachable. Stop is abrupt: the listener closes immediately and in-flight
//! handlers are not drained; they observe failed writes instead.

pub mod router;

use crate::config::{ConfigError, ConfigStore, GatewayConfig};
use crate::proxy::client::{create_http_client, HttpClient};
use crate::recording::RequestLog;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway is already running")]
    AlreadyRunning,
    #[error("gateway is not running")]
    NotRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind port {0}: {1}")]
    Bind(u16, std::io::Error),
}

/// State shared between the listener and every request handler.
pub struct GatewayCore {
    pub config: ConfigStore,
    pub log: Arc<RequestLog>,
    client: RwLock<HttpClient>,
}

impl GatewayCore {
    /// Cheap handle to the pooled upstream client.
    pub fn client(&self) -> HttpClient {
        self.client.read().clone()
    }
}

pub struct Gateway {
    core: Arc<GatewayCore>,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

impl Gateway {
    pub fn new(initial: GatewayConfig) -> Self {
        let client = create_http_client(&initial.connection_pool);
        Self {
            core: Arc::new(GatewayCore {
                config: ConfigStore::new(initial),
                log: Arc::new(RequestLog::default()),
                client: RwLock::new(client),
            }),
            shutdown: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.core.config
    }

    pub fn log(&self) -> &Arc<RequestLog> {
        &self.core.log
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Bind the configured port and start serving.
    ///
    /// The whole configuration is swapped in as one unit, so handlers can
    /// never observe a half-applied config across the transition. On bind
    /// failure the store is left untouched and the lifecycle stays stopped.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, mut config: GatewayConfig) -> Result<(), GatewayError> {
        config.validate()?;

        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }

        let port = config.port;
        let listener = bind_listener(port).map_err(|e| GatewayError::Bind(port, e))?;
        info!("Gateway listening on port {port}");

        *self.core.client.write() = create_http_client(&config.connection_pool);
        config.running = true;
        self.core.config.replace(config);

        let (tx, _) = broadcast::channel(1);
        let mut shutdown_rx = tx.subscribe();
        *shutdown = Some(tx);

        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote_addr)) => {
                                let core = Arc::clone(&core);
                                let mut conn_shutdown = shutdown_rx.resubscribe();
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let core = Arc::clone(&core);
                                        router::handle_request(core, req)
                                    });
                                    let conn = http1::Builder::new().serve_connection(io, service);
                                    tokio::pin!(conn);
                                    tokio::select! {
                                        result = &mut conn => {
                                            if let Err(e) = result {
                                                debug!("Connection error from {remote_addr}: {e}");
                                            }
                                        }
                                        // Stop severs established connections too,
                                        // not just the accept loop.
                                        _ = conn_shutdown.recv() => {
                                            debug!("Connection from {remote_addr} dropped by shutdown");
                                        }
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error on port {port}: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Gateway on port {port} shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Close the listener immediately. In-flight handlers keep running
    /// until their next write fails.
    pub fn stop(&self) -> Result<(), GatewayError> {
        let mut shutdown = self.shutdown.lock();
        let tx = shutdown.take().ok_or(GatewayError::NotRunning)?;
        let _ = tx.send(());
        self.core.config.set_running(false);
        info!("Gateway stopped");
        Ok(())
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

/// Bind synchronously so no lock is ever held across an await, then hand
/// the socket to tokio.
fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}
