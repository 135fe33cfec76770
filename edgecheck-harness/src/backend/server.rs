//! A controllable backend HTTP(S) server.
//!
//! The edge under test is pointed at these servers as its origin and mirrors.
//! Each one runs its own accept loop on a spawned task, can be stopped and
//! started again on the same port, and stamps its name on every response so
//! the harness can tell from the edge's answer which backend served it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use edgecheck_core::domain::backend::{
    BACKEND_NAME_HEADER, PROBE_HEADER, PROBE_HEADER_VALUE, PROBE_PATH,
};
use edgecheck_core::{BackendIdentity, HarnessError, Lifecycle};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::handler::{empty, BackendHandler, BackendResponse, HandlerSlot};

/// State shared between a backend and its connection tasks.
struct ServeState {
    name: String,
    marker: HeaderValue,
    handler: HandlerSlot,
}

/// A listener that is currently serving.
struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A named backend server the edge treats as origin or mirror.
pub struct BackendServer {
    identity: BackendIdentity,
    tls: Option<Arc<ServerConfig>>,
    state: Arc<ServeState>,
    running: Mutex<Option<Running>>,
}

impl BackendServer {
    /// Create a backend. `port` may be `0` to let the kernel pick one on first
    /// start; `tls` of `None` serves plain HTTP.
    pub fn new(
        name: impl Into<String>,
        port: u16,
        tls: Option<Arc<ServerConfig>>,
    ) -> Result<Self, HarnessError> {
        let name = name.into();
        let marker = HeaderValue::from_str(&name)
            .map_err(|_| HarnessError::Config(format!("backend name {name:?} is not a valid header value")))?;

        Ok(Self {
            identity: BackendIdentity::new(name.clone(), port),
            tls,
            state: Arc::new(ServeState {
                name,
                marker,
                handler: HandlerSlot::new(),
            }),
            running: Mutex::new(None),
        })
    }

    /// Create a backend serving HTTPS with a freshly generated self-signed
    /// certificate.
    pub fn self_signed(name: impl Into<String>, port: u16) -> Result<Self, HarnessError> {
        let tls = crate::tls::self_signed_config()?;
        Self::new(name, port, Some(tls))
    }

    /// Name stamped into the identity header.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Configured port, or the one the kernel assigned on first start.
    pub fn port(&self) -> u16 {
        self.identity.port()
    }

    /// Whether the backend serves HTTPS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Loopback URL of the backend, for talking to it directly.
    pub fn url(&self) -> String {
        let scheme = if self.is_tls() { "https" } else { "http" };
        format!("{scheme}://127.0.0.1:{}", self.port())
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.identity.lifecycle()
    }

    /// Whether the backend is serving.
    pub fn is_started(&self) -> bool {
        self.identity.is_started()
    }

    /// Install a handler for every following non-probe request.
    pub fn switch_handler(&self, handler: impl BackendHandler) {
        self.state.handler.switch(handler);
    }

    /// Put the default empty `200` handler back.
    pub fn reset_handler(&self) {
        self.state.handler.reset();
    }

    /// Bind the port, reset the handler and start serving.
    ///
    /// Starting an already started backend only resets its handler.
    pub async fn start(&self) -> Result<SocketAddr, HarnessError> {
        let mut running = self.running.lock().await;
        self.reset_handler();

        if let Some(current) = running.as_ref() {
            return Ok(current.addr);
        }

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.port()));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| HarnessError::Bind {
                backend: self.name().to_string(),
                port: self.port(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| HarnessError::Bind {
            backend: self.name().to_string(),
            port: self.port(),
            source,
        })?;
        self.identity.remember_port(addr.port());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let acceptor = self.tls.clone().map(TlsAcceptor::from);
        let task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            self.state.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        self.identity.set_lifecycle(Lifecycle::Started);
        info!(backend = self.name(), port = addr.port(), tls = self.is_tls(), "started backend");

        Ok(addr)
    }

    /// Close the listener and every open connection, and wait until the port
    /// is released. Connection attempts made after this returns are refused.
    pub async fn stop(&self) {
        let Some(current) = self.running.lock().await.take() else {
            return;
        };

        let _ = current.shutdown.send(true);
        if let Err(e) = current.task.await {
            warn!(backend = self.name(), error = %e, "backend accept loop ended abnormally");
        }

        self.identity.set_lifecycle(Lifecycle::Stopped);
        info!(backend = self.name(), port = current.addr.port(), "stopped backend");
    }
}

impl std::fmt::Debug for BackendServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendServer")
            .field("name", &self.name())
            .field("port", &self.port())
            .field("tls", &self.is_tls())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    state: Arc<ServeState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_stream(stream, peer, acceptor.clone(), state.clone()));
                }
                Err(e) => warn!(backend = %state.name, error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

async fn serve_stream(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    state: Arc<ServeState>,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_io(tls_stream, peer, state).await,
            Err(e) => debug!(backend = %state.name, %peer, error = %e, "TLS handshake failed"),
        },
        None => serve_io(stream, peer, state).await,
    }
}

async fn serve_io<I>(io: I, peer: SocketAddr, state: Arc<ServeState>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| dispatch(state.clone(), req));
    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!(%peer, error = %err, "error serving connection");
    }
}

/// Answer health probes directly and hand everything else to the installed
/// handler.
///
/// Every response carries the identity header. It is the default for the
/// response, so a handler that sets `Backend-Name` itself keeps its own value.
async fn dispatch(
    state: Arc<ServeState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(backend = %state.name, error = %e, "failed to read request body");
            Bytes::new()
        }
    };
    let request = Request::from_parts(parts, body);

    let mut response = if is_probe(&request) {
        debug!(backend = %state.name, "answered health probe");
        probe_response()
    } else {
        state.handler.handle(&request)
    };

    response
        .headers_mut()
        .entry(BACKEND_NAME_HEADER)
        .or_insert_with(|| state.marker.clone());
    Ok(response)
}

fn is_probe<B>(request: &Request<B>) -> bool {
    request.method() == Method::HEAD && request.uri().path() == PROBE_PATH
}

fn probe_response() -> BackendResponse {
    let mut response = empty(StatusCode::OK);
    response
        .headers_mut()
        .insert(PROBE_HEADER, HeaderValue::from_static(PROBE_HEADER_VALUE));
    response
}
