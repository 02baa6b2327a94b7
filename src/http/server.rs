//! HTTP/HTTPS server startup logic.
//!
//! [`start`] decides the effective TLS mode, provisions the transport, binds
//! the listener(s) and spawns the accept loops. It returns as soon as the
//! sockets are bound; the returned [`ServerHandle`] owns every spawned task
//! and is the only way to stop them.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use axum::Router;
use axum_server::Handle;
use tokio::task::JoinHandle;

use crate::config::AppConfig;

use super::network;
use super::redirect;
use super::tls::{self, ListenMode, TlsError, TlsStrategy, TransportConfig};

/// Time allowed for the accept loop to wind down after forced shutdown
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[from] TlsError),

    #[error("Listener failed: {0}")]
    Listener(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    #[error("Failed to drain server: {0}")]
    Drain(String),
}

/// Result of draining a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight request finished before the deadline
    Completed,
    /// The deadline elapsed and remaining connections were aborted
    DeadlineElapsed,
}

struct Listener {
    handle: Handle,
    addr: SocketAddr,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl Listener {
    fn spawn<F>(handle: Handle, addr: SocketAddr, serve: F) -> Self
    where
        F: std::future::Future<Output = io::Result<()>> + Send + 'static,
    {
        Self {
            handle,
            addr,
            task: Some(tokio::spawn(serve)),
        }
    }

    /// Wait for the accept loop to end. Pending forever once it was observed.
    async fn exited(&mut self, name: &str) -> ServerError {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.task = None;

        let reason = match result {
            Ok(Ok(())) => "accept loop exited unexpectedly".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::error!(listener = name, addr = %self.addr, %reason, "Listener stopped");
        ServerError::Listener(format!("{name} listener on {}: {reason}", self.addr))
    }
}

/// A running server. Dropping it does not stop the listeners; call
/// [`ServerHandle::drain`].
pub struct ServerHandle {
    mode: ListenMode,
    main: Listener,
    /// Plaintext redirect / ACME challenge listener
    auxiliary: Option<Listener>,
    /// Certificate reload and ACME event tasks
    background: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn mode(&self) -> ListenMode {
        self.mode
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.main.addr
    }

    /// Address of the plaintext companion listener, if one is running
    pub fn auxiliary_addr(&self) -> Option<SocketAddr> {
        self.auxiliary.as_ref().map(|listener| listener.addr)
    }

    /// Number of open connections on the main listener
    pub fn connection_count(&self) -> usize {
        self.main.handle.connection_count()
    }

    /// Resolves only if the main accept loop or the plaintext companion
    /// stops on its own, which is always a failure. Cancel safe.
    pub async fn closed(&mut self) -> ServerError {
        match self.auxiliary.as_mut() {
            Some(auxiliary) => tokio::select! {
                err = self.main.exited("main") => err,
                err = auxiliary.exited("companion") => err,
            },
            None => self.main.exited("main").await,
        }
    }

    /// Stop accepting connections, let in-flight requests finish within
    /// `deadline`, then abort whatever is left.
    ///
    /// Consumes the handle, so a server is drained at most once.
    pub async fn drain(mut self, deadline: Duration) -> Result<DrainOutcome, ServerError> {
        tracing::info!(
            deadline_secs = deadline.as_secs_f64(),
            connections = self.main.handle.connection_count(),
            "Draining connections"
        );

        let started = Instant::now();
        self.main.handle.graceful_shutdown(Some(deadline));
        if let Some(auxiliary) = &self.auxiliary {
            auxiliary.handle.graceful_shutdown(Some(deadline));
        }

        let outcome = match self.main.task.take() {
            Some(mut task) => match tokio::time::timeout(deadline, &mut task).await {
                Ok(result) => {
                    join_result(result)?;
                    if started.elapsed() >= deadline {
                        DrainOutcome::DeadlineElapsed
                    } else {
                        DrainOutcome::Completed
                    }
                }
                Err(_) => {
                    self.main.handle.shutdown();
                    finish_within(task, FORCE_CLOSE_GRACE).await?;
                    DrainOutcome::DeadlineElapsed
                }
            },
            None => DrainOutcome::Completed,
        };

        if outcome == DrainOutcome::DeadlineElapsed {
            tracing::warn!(
                remaining = self.main.handle.connection_count(),
                "Shutdown deadline elapsed, aborting remaining connections"
            );
            // The accept loop may return at the deadline with handlers still running
            self.main.handle.shutdown();
        }

        if let Some(mut auxiliary) = self.auxiliary.take() {
            auxiliary.handle.shutdown();
            if let Some(task) = auxiliary.task.take() {
                finish_within(task, FORCE_CLOSE_GRACE).await?;
            }
        }

        for task in self.background.drain(..) {
            task.abort();
        }

        Ok(outcome)
    }
}

fn join_result(result: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServerError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Drain(e.to_string())),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ServerError::Drain(e.to_string())),
    }
}

/// Wait for an accept loop that has been told to stop, aborting it if it
/// does not finish within `grace`.
async fn finish_within(
    mut task: JoinHandle<io::Result<()>>,
    grace: Duration,
) -> Result<(), ServerError> {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(result) => join_result(result),
        Err(_) => {
            tracing::warn!("Listener did not stop in time, aborting accept loop");
            task.abort();
            Ok(())
        }
    }
}

/// Bind a non-blocking std listener for handing to axum-server.
fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let bind_error = |source| ServerError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };

    let listener = TcpListener::bind((host, port)).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    Ok(listener)
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr, ServerError> {
    listener
        .local_addr()
        .map_err(|e| ServerError::Listener(format!("cannot read bound address: {e}")))
}

/// Decide the effective TLS strategy for `config`.
///
/// Local and private-network hosts always get plain HTTP, whatever the
/// configuration says.
pub fn effective_strategy(config: &AppConfig) -> Result<TlsStrategy, TlsError> {
    let host = config.http.host.as_str();
    let mut tls_config = config.tls.clone();

    if tls_config.enabled && network::is_local(host) {
        tracing::info!(
            %host,
            "Non-routable or local host detected, TLS disabled for this listener"
        );
        tls_config.enabled = false;
    }

    TlsStrategy::select(&tls_config, host)
}

/// Start the HTTP/HTTPS server based on configuration.
///
/// Returns once every listener is bound. Bind and TLS failures are returned
/// before anything is spawned.
pub async fn start(app: Router, config: &AppConfig) -> Result<ServerHandle, ServerError> {
    let host = config.http.host.as_str();
    let port = config.http.port;
    tracing::info!(%host, port, "Starting server");

    let strategy = effective_strategy(config)?;
    let transport = tls::provision(&strategy).await?;

    let listener = bind(host, port)?;
    let addr = local_addr(&listener)?;
    let handle = Handle::new();
    let mut background = Vec::new();

    let (main, auxiliary) = match transport {
        None => {
            if !network::is_local(host) {
                tracing::warn!(
                    "TLS disabled - server running on plain HTTP (not recommended for production)"
                );
            }
            tracing::info!(%addr, "Starting HTTP server");

            let server = axum_server::from_tcp(listener)
                .handle(handle.clone())
                .serve(app.into_make_service());
            (Listener::spawn(handle, addr, server), None)
        }
        Some(TransportConfig::Static(rustls_config)) => {
            let companion = if config.tls.redirect_http {
                Some(bind("0.0.0.0", config.tls.redirect_port)?)
            } else {
                None
            };

            tracing::info!(%addr, "Starting HTTPS server (manual certificates)");

            if let TlsStrategy::Manual {
                cert_path,
                key_path,
            } = &strategy
            {
                background.extend(tls::spawn_reload_task(
                    rustls_config.clone(),
                    cert_path.clone(),
                    key_path.clone(),
                ));
            }

            let server = axum_server::tls_rustls::from_tcp_rustls(listener, rustls_config)
                .handle(handle.clone())
                .serve(app.into_make_service());
            let main = Listener::spawn(handle, addr, server);

            let auxiliary = companion
                .map(|companion| spawn_companion(companion, redirect::redirect_router(addr.port())))
                .transpose()?;
            (main, auxiliary)
        }
        Some(TransportConfig::Dynamic(acme)) => {
            // The authority validates the domain over plain HTTP
            let companion = bind("0.0.0.0", config.tls.redirect_port)?;

            tracing::info!(%addr, "Starting HTTPS server (ACME)");

            let (acceptor, resolver, events) = acme.spawn_events();
            background.push(events);

            let server = axum_server::from_tcp(listener)
                .acceptor(acceptor)
                .handle(handle.clone())
                .serve(app.into_make_service());
            let main = Listener::spawn(handle, addr, server);

            let auxiliary =
                spawn_companion(companion, redirect::challenge_router(resolver, addr.port()))?;
            (main, Some(auxiliary))
        }
    };

    Ok(ServerHandle {
        mode: strategy.mode(),
        main,
        auxiliary,
        background,
    })
}

fn spawn_companion(listener: TcpListener, app: Router) -> Result<Listener, ServerError> {
    let addr = local_addr(&listener)?;
    let handle = Handle::new();
    tracing::info!(%addr, "Starting plaintext companion listener");

    let server = axum_server::from_tcp(listener)
        .handle(handle.clone())
        .serve(app.into_make_service());
    Ok(Listener::spawn(handle, addr, server))
}
