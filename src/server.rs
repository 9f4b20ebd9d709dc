//! HTTP server for the native router, with graceful shutdown.
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops accepting new connections,
//! 2. lets every in-flight connection run to completion,
//! 3. returns from [`Server::serve`].
//!
//! Every request runs the dispatch pipeline on its connection task, so a
//! panicking handler costs one `500` response, never the process.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::router::Router;

/// Infrastructure failures: binding or accepting, never a request error.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when
    /// [`serve`](Server::serve) is called.
    ///
    /// ```rust
    /// use apiary::Server;
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ServeError> {
        let addr = addr
            .parse()
            .map_err(|_| ServeError::InvalidAddress(addr.to_owned()))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts connections and dispatches them through `router` until a
    /// shutdown signal arrives and in-flight connections have drained.
    pub async fn serve(self, router: Router) -> Result<(), ServeError> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, router, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve) on an already-bound listener, stopping
    /// when `shutdown` resolves.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        router: Router,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), ServeError> {
        let router = Arc::new(router);
        info!(addr = %listener.local_addr()?, "apiary listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move {
                                Ok::<_, std::convert::Infallible>(router.handle(req).await)
                            }
                        });

                        // `auto::Builder` speaks HTTP/1.1 and HTTP/2, whichever the client picks.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("apiary stopped");
        Ok(())
    }
}

/// Resolves on SIGTERM (Unix) or Ctrl-C, whichever comes first.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
