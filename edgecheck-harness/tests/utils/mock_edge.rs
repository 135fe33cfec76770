//! A minimal stand-in for a CDN edge.
//!
//! Forwards plain HTTP to a priority-ordered list of upstreams, skipping the
//! ones its `HEAD /` probes found unhealthy and falling back on connection
//! errors and 5xx answers. Caches `200` and `404` answers to `GET`s unless
//! the request carries credentials or the response forbids it, and refuses
//! `PURGE`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// How often every upstream is probed.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(20);

/// Lifetime of responses that do not say how long to keep them.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Body of the edge's own error page.
pub const ERROR_PAGE: &str = "Error 503 Service Unavailable. Guru Meditation: no backend";

struct Upstream {
    name: String,
    port: u16,
    healthy: AtomicBool,
}

#[derive(Clone)]
struct Answer {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

struct Cached {
    answer: Answer,
    expires: Instant,
}

struct EdgeState {
    upstreams: Vec<Upstream>,
    client: reqwest::Client,
    cache: DashMap<String, Cached>,
}

/// A running mock edge. Dropping it stops serving and probing.
pub struct MockEdge {
    addr: SocketAddr,
    state: Arc<EdgeState>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockEdge {
    /// Start an edge in front of `(name, port)` upstreams, highest priority
    /// first. Every upstream starts out unhealthy.
    pub async fn start(upstreams: Vec<(String, u16)>) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let state = Arc::new(EdgeState {
            upstreams: upstreams
                .into_iter()
                .map(|(name, port)| Upstream {
                    name,
                    port,
                    healthy: AtomicBool::new(false),
                })
                .collect(),
            client,
            cache: DashMap::new(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(serve(listener, state.clone(), shutdown_rx.clone())),
            tokio::spawn(probe(state.clone(), shutdown_rx)),
        ];

        Self {
            addr,
            state,
            shutdown,
            tasks,
        }
    }

    /// Address the edge listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://<addr>/`, for building a request factory.
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    /// Whether the last probe of `name` succeeded.
    pub fn is_healthy(&self, name: &str) -> bool {
        self.state
            .upstreams
            .iter()
            .any(|u| u.name == name && u.healthy.load(Ordering::SeqCst))
    }
}

impl Drop for MockEdge {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve(listener: TcpListener, state: Arc<EdgeState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(state.clone(), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        }
    }
}

async fn probe(state: Arc<EdgeState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        for upstream in &state.upstreams {
            let url = format!("http://127.0.0.1:{}/", upstream.port);
            let healthy = match state
                .client
                .head(url.as_str())
                .timeout(Duration::from_millis(250))
                .send()
                .await
            {
                Ok(response) => {
                    response.status() == StatusCode::OK
                        && response
                            .headers()
                            .get("PING")
                            .is_some_and(|v| v.as_bytes() == b"PONG")
                }
                Err(_) => false,
            };
            upstream.healthy.store(healthy, Ordering::SeqCst);
        }
    }
}

async fn handle(state: Arc<EdgeState>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method().as_str() == "PURGE" {
        return Ok(to_response(&Answer {
            status: StatusCode::FORBIDDEN,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"purge not allowed"),
        }));
    }

    let (parts, body) = req.into_parts();
    let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let cacheable = parts.method == Method::GET
        && !parts.headers.contains_key(header::AUTHORIZATION)
        && !parts.headers.contains_key(header::COOKIE);

    if cacheable {
        if let Some(hit) = state.cache.get(&path) {
            if hit.expires > Instant::now() {
                return Ok(to_response(&hit.answer));
            }
        }
    }

    let answer = forward(&state, &parts.method, &path, &parts.headers, body).await;
    let storable = answer.status == StatusCode::OK || answer.status == StatusCode::NOT_FOUND;
    if cacheable && storable {
        if let Some(ttl) = cache_ttl(&answer.headers) {
            state.cache.insert(
                path,
                Cached {
                    answer: answer.clone(),
                    expires: Instant::now() + ttl,
                },
            );
        }
    }
    Ok(to_response(&answer))
}

async fn forward(
    state: &EdgeState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Answer {
    let mut headers = headers.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONNECTION);

    let mut last_error = None;
    for upstream in state.upstreams.iter().filter(|u| u.healthy.load(Ordering::SeqCst)) {
        let url = format!("http://127.0.0.1:{}{path}", upstream.port);
        let sent = state
            .client
            .request(method.clone(), url.as_str())
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(_) => {
                upstream.healthy.store(false, Ordering::SeqCst);
                continue;
            }
        };

        let answer = Answer {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.bytes().await.unwrap_or_default(),
        };
        if answer.status.is_server_error() && !answer.headers.contains_key("No-Fallback") {
            last_error = Some(answer);
            continue;
        }
        return answer;
    }

    last_error.unwrap_or_else(|| Answer {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers: HeaderMap::new(),
        body: Bytes::from_static(ERROR_PAGE.as_bytes()),
    })
}

/// Lifetime of a response, if it may be stored at all. `max-age` wins over
/// `Expires`; responses with neither are kept for [`DEFAULT_TTL`].
fn cache_ttl(headers: &HeaderMap) -> Option<Duration> {
    if headers.contains_key(header::SET_COOKIE) {
        return None;
    }

    let mut max_age = None;
    if let Some(cache_control) = headers.get(header::CACHE_CONTROL) {
        for directive in cache_control.to_str().ok()?.split(',').map(str::trim) {
            match directive {
                "private" | "no-cache" | "no-store" => return None,
                _ => {
                    if let Some(seconds) = directive.strip_prefix("max-age=") {
                        max_age = Some(seconds.parse::<u64>().ok()?);
                    }
                }
            }
        }
    }
    if let Some(seconds) = max_age {
        return (seconds > 0).then(|| Duration::from_secs(seconds));
    }

    match headers.get(header::EXPIRES) {
        Some(expires) => {
            let expires = httpdate::parse_http_date(expires.to_str().ok()?).ok()?;
            expires
                .duration_since(SystemTime::now())
                .ok()
                .filter(|ttl| !ttl.is_zero())
        }
        None => Some(DEFAULT_TTL),
    }
}

fn to_response(answer: &Answer) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(answer.body.clone()));
    *response.status_mut() = answer.status;
    for (name, value) in &answer.headers {
        if *name == header::CONNECTION
            || *name == header::TRANSFER_ENCODING
            || *name == header::CONTENT_LENGTH
        {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    response
}

#[test]
fn ttl_follows_cache_control() {
    let mut headers = HeaderMap::new();
    assert_eq!(cache_ttl(&headers), Some(DEFAULT_TTL));

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=5, public"));
    assert_eq!(cache_ttl(&headers), Some(Duration::from_secs(5)));

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    assert_eq!(cache_ttl(&headers), None);

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=60"));
    assert_eq!(cache_ttl(&headers), None);

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public"));
    headers.insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
    assert_eq!(cache_ttl(&headers), None);
}

#[test]
fn ttl_follows_expires_unless_max_age_is_set() {
    let in_a_minute = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(60));
    let mut headers = HeaderMap::new();
    headers.insert(header::EXPIRES, HeaderValue::from_str(&in_a_minute).unwrap());
    let ttl = cache_ttl(&headers).unwrap();
    assert!(ttl > Duration::from_secs(58) && ttl <= Duration::from_secs(60));

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=5"));
    assert_eq!(cache_ttl(&headers), Some(Duration::from_secs(5)));

    headers.remove(header::CACHE_CONTROL);
    let long_ago = httpdate::fmt_http_date(SystemTime::UNIX_EPOCH);
    headers.insert(header::EXPIRES, HeaderValue::from_str(&long_ago).unwrap());
    assert_eq!(cache_ttl(&headers), None);

    headers.insert(header::EXPIRES, HeaderValue::from_static("not a date"));
    assert_eq!(cache_ttl(&headers), None);
}
