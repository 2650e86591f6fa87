use crate::config::Config;
use crate::server::request_handler::RequestHandler;
use crate::server::tls::TlsManager;
use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        })
    }
}

/// What a supervisor answers to: its protocol, server name and bind address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerIdentity {
    pub protocol: Protocol,
    pub server_name: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    keep_alive: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl ConnectionSettings {
    /// `HttpServerKeepAlive` only governs the plaintext listener; TLS always
    /// keeps connections alive.
    fn from_config(protocol: Protocol, config: &Config) -> Self {
        let nonzero = |d: Duration| (!d.is_zero()).then_some(d);
        let read_timeout = nonzero(config.http.read_timeout);
        Self {
            keep_alive: protocol == Protocol::Https || config.http.keep_alive,
            read_timeout,
            write_timeout: nonzero(config.http.write_timeout),
            idle_timeout: nonzero(config.http.idle_timeout).or(read_timeout),
        }
    }
}

/// Owns one listener from bind to drain.
pub struct ListenerSupervisor {
    identity: ListenerIdentity,
    handler: Arc<RequestHandler>,
    tls: Option<TlsManager>,
    settings: ConnectionSettings,
    span: Span,
}

impl ListenerSupervisor {
    /// `None` when the plaintext listen address is empty.
    pub fn plaintext(config: &Config, handler: Arc<RequestHandler>) -> Option<Self> {
        if !config.http_enabled() {
            return None;
        }
        Some(Self::new(
            ListenerIdentity {
                protocol: Protocol::Http,
                server_name: config.http.server_name.clone(),
                address: config.http.listen_address.clone(),
            },
            handler,
            None,
            config,
        ))
    }

    /// `None` when the TLS listen address is empty. Otherwise the key pair is
    /// loaded now and a failure is returned to the caller.
    pub fn tls(config: &Config, handler: Arc<RequestHandler>) -> Result<Option<Self>> {
        if !config.https_enabled() {
            return Ok(None);
        }
        let tls = TlsManager::new(&config.https)?;
        Ok(Some(Self::new(
            ListenerIdentity {
                protocol: Protocol::Https,
                server_name: config.https.server_name.clone(),
                address: config.https.listen_address.clone(),
            },
            handler,
            Some(tls),
            config,
        )))
    }

    fn new(
        identity: ListenerIdentity,
        handler: Arc<RequestHandler>,
        tls: Option<TlsManager>,
        config: &Config,
    ) -> Self {
        let span = info_span!(
            "listener",
            protocol = %identity.protocol,
            address = %identity.address
        );
        let settings = ConnectionSettings::from_config(identity.protocol, config);
        Self {
            identity,
            handler,
            tls,
            settings,
            span,
        }
    }

    pub fn identity(&self) -> &ListenerIdentity {
        &self.identity
    }

    pub async fn bind(self) -> Result<BoundListener> {
        let span = self.span.clone();
        self.try_bind().instrument(span).await
    }

    async fn try_bind(self) -> Result<BoundListener> {
        debug!("starting");
        let address = bind_address(&self.identity.address);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind to {}", address))?;
        Ok(BoundListener {
            listener,
            supervisor: self,
        })
    }

    /// Binds and serves until cancelled. Errors are logged here and never
    /// reach the other listener.
    pub async fn run(self, shutdown: ShutdownSignal) {
        let span = self.span.clone();
        let result = match self.bind().await {
            Ok(bound) => bound.serve(shutdown).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(parent: &span, error = %format!("{:#}", e), "error listening or serving");
        }
        debug!(parent: &span, "stopped");
    }
}

pub struct BoundListener {
    listener: TcpListener,
    supervisor: ListenerSupervisor,
}

impl BoundListener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<()> {
        let span = self.supervisor.span.clone();
        self.accept_loop(shutdown).instrument(span).await
    }

    async fn accept_loop(self, mut shutdown: ShutdownSignal) -> Result<()> {
        let BoundListener { listener, supervisor } = self;
        info!(server_name = %supervisor.identity.server_name, "serving");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let handler = supervisor.handler.clone();
                    let tls = supervisor.tls.clone();
                    let settings = supervisor.settings;
                    let shutdown = shutdown.clone();

                    tokio::spawn(
                        async move {
                            let result =
                                handle_connection(stream, addr, handler, tls, settings, shutdown)
                                    .await;
                            if let Err(e) = result {
                                debug!("Connection error from {}: {:#}", addr, e);
                            }
                        }
                        .in_current_span(),
                    );
                }
            }
        }

        drop(listener);
        info!("draining: stopped accepting connections");
        Ok(())
    }
}

/// `:80` means every IPv4 interface.
pub fn bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    tls: Option<TlsManager>,
    settings: ConnectionSettings,
    shutdown: ShutdownSignal,
) -> Result<()> {
    match tls {
        Some(tls) => {
            let handshake = tls.acceptor().accept(stream);
            let tls_stream = match settings.read_timeout {
                Some(limit) => tokio::time::timeout(limit, handshake)
                    .await
                    .context("TLS handshake timed out")?,
                None => handshake.await,
            }
            .context("TLS handshake failed")?;
            serve_http1(tls_stream, addr, handler, settings, shutdown).await
        }
        None => serve_http1(stream, addr, handler, settings, shutdown).await,
    }
}

async fn sleep_for(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => futures::future::pending().await,
    }
}

/// Serves one connection. Idle keep-alive connections and draining ones are
/// closed gracefully; a connection that has been asked to close gets at most
/// the write timeout to finish.
async fn serve_http1<S>(
    io: S,
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    settings: ConnectionSettings,
    mut shutdown: ShutdownSignal,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (activity_tx, mut activity_rx) = watch::channel(());
    let service = service_fn(move |req: Request<Incoming>| {
        activity_tx.send_replace(());
        let response = handler.handle_request(&req, addr);
        async move { Ok::<_, Infallible>(response) }
    });

    let mut builder = http1::Builder::new();
    // None clears hyper's own header deadline, which applies once a timer is set
    builder
        .timer(TokioTimer::new())
        .keep_alive(settings.keep_alive)
        .header_read_timeout(settings.read_timeout);

    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut closing = false;
    let mut activity_open = true;
    loop {
        tokio::select! {
            biased;
            result = conn.as_mut() => {
                return result.map_err(|e| anyhow::anyhow!("HTTP connection error: {}", e));
            }
            changed = activity_rx.changed(), if activity_open && !closing => {
                activity_open = changed.is_ok();
            }
            _ = shutdown.cancelled(), if !closing => {
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
            _ = sleep_for(settings.idle_timeout), if !closing => {
                debug!("closing idle connection from {}", addr);
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
            _ = sleep_for(settings.write_timeout), if closing => {
                warn!("connection from {} did not finish in time, dropping it", addr);
                return Ok(());
            }
        }
    }
}
