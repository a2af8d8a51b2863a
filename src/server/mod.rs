//! Concurrent TELNET/TELNETS connection manager.
//!
//! Each accepted connection runs on its own task with a lifecycle token.
//! The token is cancelled by the optional per-connection timeout, by
//! [`Server::shutdown`], or when the handler returns. Cancellation drops the
//! handler task, which closes the transport.

mod handler;
mod registry;
mod tls;

use crate::codec::{OPT_SGA, Verb};
use crate::error::{CodedError, ErrorCode, TelnetResult};
use crate::session::{BoxTransport, DEFAULT_NAWS_TIMEOUT, Session};
use registry::{Registration, Registry};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use handler::{Echo, Handler, HandlerFn};
pub use tls::load_tls_config;

pub const DEFAULT_TELNET_ADDR: &str = "0.0.0.0:23";
pub const DEFAULT_TELNETS_ADDR: &str = "0.0.0.0:992";

/// Wraps the transport before the session is built, e.g. for byte logging.
pub type TransportHook =
    Arc<dyn Fn(&CancellationToken, BoxTransport) -> BoxTransport + Send + Sync>;

/// Replaces the lifecycle token of a new connection, keyed by peer address.
/// Return a token derived from the one given (`child_token`) so that
/// shutdown and timeouts still reach the connection.
pub type TokenHook = Arc<dyn Fn(&str, CancellationToken) -> CancellationToken + Send + Sync>;

enum TlsSource {
    Files { cert: PathBuf, key: PathBuf },
    Config(Arc<ServerConfig>),
}

pub struct ServerBuilder {
    listen: Option<String>,
    timeout: Option<Duration>,
    handler: Option<Arc<dyn Handler>>,
    transport_hook: Option<TransportHook>,
    token_hook: Option<TokenHook>,
    tls: Option<TlsSource>,
    line_discipline: bool,
    naws_timeout: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            listen: None,
            timeout: None,
            handler: None,
            transport_hook: None,
            token_hook: None,
            tls: None,
            line_discipline: false,
            naws_timeout: DEFAULT_NAWS_TIMEOUT,
        }
    }
}

impl ServerBuilder {
    /// Listen address. Defaults to port 23, or 992 when TLS is configured.
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = Some(addr.into());
        self
    }

    /// Deadline for every connection, measured from accept.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn handler_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler(HandlerFn(f))
    }

    pub fn transport_hook(
        mut self,
        hook: impl Fn(&CancellationToken, BoxTransport) -> BoxTransport + Send + Sync + 'static,
    ) -> Self {
        self.transport_hook = Some(Arc::new(hook));
        self
    }

    pub fn token_hook(
        mut self,
        hook: impl Fn(&str, CancellationToken) -> CancellationToken + Send + Sync + 'static,
    ) -> Self {
        self.token_hook = Some(Arc::new(hook));
        self
    }

    /// PEM certificate chain and private key, loaded by [`ServerBuilder::build`].
    pub fn tls_files(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsSource::Files {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    pub fn tls_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(TlsSource::Config(config));
        self
    }

    /// Initial line discipline of every session.
    pub fn line_discipline(mut self, enabled: bool) -> Self {
        self.line_discipline = enabled;
        self
    }

    pub fn naws_timeout(mut self, timeout: Duration) -> Self {
        self.naws_timeout = timeout;
        self
    }

    pub fn build(self) -> TelnetResult<Server> {
        let tls = match self.tls {
            Some(TlsSource::Files { cert, key }) => {
                Some(TlsAcceptor::from(load_tls_config(&cert, &key)?))
            }
            Some(TlsSource::Config(config)) => Some(TlsAcceptor::from(config)),
            None => None,
        };
        let handler = self.handler.unwrap_or_else(|| {
            tracing::debug!("No handler set, using echo");
            Arc::new(Echo) as Arc<dyn Handler>
        });

        Ok(Server {
            inner: Arc::new(ServerInner {
                listen: self.listen,
                timeout: self.timeout.filter(|timeout| !timeout.is_zero()),
                handler,
                transport_hook: self.transport_hook,
                token_hook: self.token_hook,
                tls,
                line_discipline: self.line_discipline,
                naws_timeout: self.naws_timeout,
                registry: Arc::new(Registry::default()),
                shutdown: CancellationToken::new(),
                serving: AtomicBool::new(false),
                local_addr: Mutex::new(None),
            }),
        })
    }
}

/// Handle to a TELNET server. Clones share the same listener and registry.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    listen: Option<String>,
    timeout: Option<Duration>,
    handler: Arc<dyn Handler>,
    transport_hook: Option<TransportHook>,
    token_hook: Option<TokenHook>,
    tls: Option<TlsAcceptor>,
    line_discipline: bool,
    naws_timeout: Duration,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    serving: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn listen_and_serve(&self) -> TelnetResult<()> {
        let addr = match &self.inner.listen {
            Some(addr) if !addr.is_empty() => addr.as_str(),
            _ if self.inner.tls.is_some() => DEFAULT_TELNETS_ADDR,
            _ => DEFAULT_TELNET_ADDR,
        };
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            CodedError::new(ErrorCode::IoError, "Failed to bind listener")
                .with_details(format!("{addr}: {err}"))
        })?;
        self.serve(listener).await
    }

    /// Accepts connections from `listener` until [`Server::shutdown`] is
    /// called (`Ok`) or accepting fails (`Err`). A server serves at most once.
    pub async fn serve(&self, listener: TcpListener) -> TelnetResult<()> {
        if self.inner.serving.swap(true, Ordering::SeqCst) {
            return Err(CodedError::new(ErrorCode::AlreadyServing, "Server already listening").into());
        }

        let local_addr = listener.local_addr()?;
        *self
            .inner
            .local_addr
            .lock()
            .expect("local address mutex poisoned") = Some(local_addr);
        tracing::info!(
            addr = %local_addr,
            tls = self.inner.tls.is_some(),
            "Telnet server listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => {
                    tracing::info!(addr = %local_addr, "Telnet listener closed");
                    return Ok(());
                }
                accepted = listener.accept() => accepted.map_err(|err| {
                    CodedError::new(ErrorCode::IoError, "Failed to accept connection")
                        .with_details(err.to_string())
                })?,
            };
            self.dispatch(stream, peer);
        }
    }

    /// Stops accepting, then cancels every running connection and returns
    /// how many were signalled.
    ///
    /// This only waits for the cancellations to be issued. Handlers and
    /// transports finish closing in the background.
    pub async fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();

        let tokens = self.inner.registry.tokens();
        let count = tokens.len();
        let mut cancels = JoinSet::new();
        for token in tokens {
            cancels.spawn(async move { token.cancel() });
        }
        while cancels.join_next().await.is_some() {}

        tracing::info!(connections = count, "Telnet server shut down");
        count
    }

    pub fn active_connections(&self) -> usize {
        self.inner.registry.len()
    }

    /// Bound address once [`Server::serve`] has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .local_addr
            .lock()
            .expect("local address mutex poisoned")
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let peer = peer.to_string();
        let base = self.inner.shutdown.child_token();
        let registration = self.inner.registry.register(&peer, base.clone());
        if let Some(timeout) = self.inner.timeout {
            spawn_deadline(base.clone(), timeout);
        }
        let token = match &self.inner.token_hook {
            Some(hook) => hook(&peer, base.clone()),
            None => base.clone(),
        };

        tracing::debug!(peer = %peer, "Accepted telnet connection");
        let server = self.clone();
        tokio::spawn(async move {
            server
                .run_connection(stream, peer, base, token, registration)
                .await
        });
    }

    async fn run_connection(
        self,
        stream: TcpStream,
        peer: String,
        base: CancellationToken,
        token: CancellationToken,
        _registration: Registration,
    ) {
        let transport: BoxTransport = match &self.inner.tls {
            Some(acceptor) => {
                let handshake = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(peer = %peer, "Cancelled during TLS handshake");
                        base.cancel();
                        return;
                    }
                    result = acceptor.accept(stream) => result,
                };
                match handshake {
                    Ok(tls_stream) => Box::new(tls_stream),
                    Err(err) => {
                        tracing::warn!(peer = %peer, error = %err, "TLS handshake failed");
                        base.cancel();
                        return;
                    }
                }
            }
            None => Box::new(stream),
        };
        let transport = match &self.inner.transport_hook {
            Some(hook) => hook(&token, transport),
            None => transport,
        };

        let mut session = Session::new(transport, peer.clone(), token.clone())
            .with_line_discipline(self.inner.line_discipline)
            .with_naws_timeout(self.inner.naws_timeout);

        // Clients that negotiate SGA mishandle ENTER once the server toggles
        // echo, so it is refused up front.
        if let Err(err) = session.write_command(Verb::Wont, OPT_SGA).await {
            tracing::debug!(peer = %peer, error = %err, "Initial negotiation failed");
            base.cancel();
            return;
        }

        let handler = Arc::clone(&self.inner.handler);
        let session_id = session.id();
        let mut task = tokio::spawn(async move { handler.serve(session).await });

        tokio::select! {
            joined = &mut task => {
                log_panic(joined, &peer, session_id);
            }
            _ = cancelled(&base, &token) => {
                tracing::debug!(peer = %peer, "Lifecycle token cancelled, closing connection");
                task.abort();
                log_panic(task.await, &peer, session_id);
            }
        }

        base.cancel();
        tracing::debug!(peer = %peer, session_id = %session_id, "Telnet connection closed");
    }
}

async fn cancelled(base: &CancellationToken, token: &CancellationToken) {
    tokio::select! {
        _ = base.cancelled() => {}
        _ = token.cancelled() => {}
    }
}

fn spawn_deadline(token: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => token.cancel(),
        }
    });
}

fn log_panic(joined: Result<(), JoinError>, peer: &str, session_id: Uuid) {
    if let Some(panic) = panic_of(joined) {
        tracing::error!(
            peer = %peer,
            session_id = %session_id,
            panic = %panic,
            "Recovered from handler panic"
        );
    }
}

/// Panic message of a joined task; `None` when it returned or was aborted.
fn panic_of(joined: Result<(), JoinError>) -> Option<String> {
    match joined {
        Err(err) if err.is_panic() => Some(panic_message(err.into_panic())),
        _ => None,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
