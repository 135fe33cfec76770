//! The raw HTTP transport every scenario talks to the edge through.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use edgecheck_core::domain::backend::BACKEND_NAME_HEADER;
use edgecheck_core::policy::{REQUEST_TIMEOUT, SLOW_REQUEST_THRESHOLD};
use edgecheck_core::{HarnessConfig, HarnessError};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::StatusCode;
use reqwest::redirect::Policy;
use tracing::{debug, info};

use super::request::EdgeRequest;
use super::resolver::PinnedResolver;
use crate::report::{Fatal, TestCase};

/// How the client talks to the edge.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Accept any certificate the edge presents.
    pub skip_verify_tls: bool,
    /// Hostname whose first resolved address is used for the whole run.
    pub pinned_host: Option<String>,
    /// Maximum wait for response headers.
    pub header_timeout: Duration,
    /// Responses slower than this produce a warning.
    pub slow_threshold: Duration,
    /// Log every response in full.
    pub debug_responses: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            skip_verify_tls: false,
            pinned_host: None,
            header_timeout: REQUEST_TIMEOUT,
            slow_threshold: SLOW_REQUEST_THRESHOLD,
            debug_responses: false,
        }
    }
}

impl ClientOptions {
    /// Options for a run described by `config`.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        Ok(Self {
            skip_verify_tls: config.skip_verify_tls,
            pinned_host: Some(config.edge_host()?.to_string()),
            debug_responses: config.debug_resp,
            ..Self::default()
        })
    }
}

/// A response from the edge, with the body read in full.
#[derive(Debug, Clone)]
pub struct EdgeResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// Time until the response headers arrived.
    pub elapsed: Duration,
}

impl EdgeResponse {
    /// First value of a header, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Name of the backend that produced the response.
    pub fn backend_name(&self) -> Option<&str> {
        self.header(BACKEND_NAME_HEADER)
    }
}

/// Shared client for the edge.
///
/// Redirects are never followed and no cookie store is kept, so scenarios
/// see exactly what the edge sent. Cloning is cheap and shares connections.
#[derive(Clone)]
pub struct EdgeClient {
    inner: reqwest::Client,
    header_timeout: Duration,
    slow_threshold: Duration,
    debug_responses: bool,
}

impl EdgeClient {
    /// Build a client.
    pub fn new(options: ClientOptions) -> Result<Self, HarnessError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .danger_accept_invalid_certs(options.skip_verify_tls);

        if let Some(host) = options.pinned_host {
            builder = builder.dns_resolver(Arc::new(PinnedResolver::new(host)));
        }

        let inner = builder
            .build()
            .map_err(|e| HarnessError::Config(format!("HTTP client: {}", describe(&e))))?;

        Ok(Self {
            inner,
            header_timeout: options.header_timeout,
            slow_threshold: options.slow_threshold,
            debug_responses: options.debug_responses,
        })
    }

    /// Responses slower than this are flagged by [`Self::round_trip_checked`].
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Send one request and read the whole response.
    ///
    /// Fails with [`HarnessError::Timeout`] if no headers arrive within the
    /// header timeout, and with [`HarnessError::Transport`] for any other
    /// failure to get a response.
    pub async fn round_trip(&self, request: &EdgeRequest) -> Result<EdgeResponse, HarnessError> {
        let url = request.url().to_string();
        let mut builder = self
            .inner
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = match tokio::time::timeout(self.header_timeout, builder.send()).await {
            Err(_) => {
                return Err(HarnessError::Timeout {
                    url,
                    timeout: self.header_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(HarnessError::Transport {
                    url,
                    reason: describe(&e),
                })
            }
            Ok(Ok(response)) => response,
        };
        let elapsed = started.elapsed();

        let status = response.status();
        let headers = response.headers().clone();
        let body = match tokio::time::timeout(self.header_timeout, response.bytes()).await {
            Err(_) => {
                return Err(HarnessError::Timeout {
                    url,
                    timeout: self.header_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(HarnessError::Transport {
                    url,
                    reason: describe(&e),
                })
            }
            Ok(Ok(body)) => body,
        };

        debug!(
            method = %request.method(),
            %url,
            status = status.as_u16(),
            backend = headers.get(BACKEND_NAME_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("-"),
            elapsed_ms = elapsed.as_millis() as u64,
            "round trip"
        );

        Ok(EdgeResponse {
            status,
            headers,
            body,
            elapsed,
        })
    }

    /// [`Self::round_trip`] with failures recorded on `case`.
    ///
    /// The round trip is timed and logged whether or not it succeeds: a
    /// round trip slower than the slow threshold is recorded as a warning, and
    /// only then does a transport error abort the case.
    pub async fn round_trip_checked(
        &self,
        case: &mut TestCase,
        request: &EdgeRequest,
    ) -> Result<EdgeResponse, Fatal> {
        let started = Instant::now();
        let result = self.round_trip(request).await;
        let elapsed = match &result {
            Ok(response) => response.elapsed,
            Err(_) => started.elapsed(),
        };

        if elapsed > self.slow_threshold {
            case.warn(format!("Slow request, took: {elapsed:?}"));
        }
        if self.debug_responses {
            match &result {
                Ok(response) => info!(
                    case = case.name(),
                    status = %response.status,
                    headers = ?response.headers,
                    body = %response.text(),
                    "response"
                ),
                Err(e) => info!(case = case.name(), url = %request.url(), error = %e, "no response"),
            }
        }

        result.map_err(|e| case.fatal(e.to_string()))
    }
}

impl std::fmt::Debug for EdgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeClient")
            .field("header_timeout", &self.header_timeout)
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

/// reqwest's top-level message rarely says what went wrong; append the chain.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecheck_core::Vendor;

    #[test]
    fn options_follow_config() {
        let config = HarnessConfig {
            edge_host: Some("www.example.com".into()),
            origin_port: 8080,
            backup_port1: 8081,
            backup_port2: 8082,
            backend_cert: None,
            backend_key: None,
            disable_backend_tls: false,
            skip_verify_tls: true,
            skip_failover: false,
            vendor: Some(Vendor::Fastly),
            debug_resp: true,
            filter: None,
        };

        let options = ClientOptions::from_config(&config).unwrap();
        assert!(options.skip_verify_tls);
        assert!(options.debug_responses);
        assert_eq!(options.pinned_host.as_deref(), Some("www.example.com"));
        assert_eq!(options.header_timeout, Duration::from_secs(5));
        assert_eq!(options.slow_threshold, Duration::from_secs(1));
    }

    #[test]
    fn response_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert("backend-name", "backup1".parse().unwrap());
        let response = EdgeResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"lucky golden ticket"),
            elapsed: Duration::from_millis(3),
        };
        assert_eq!(response.backend_name(), Some("backup1"));
        assert_eq!(response.text(), "lucky golden ticket");
        assert_eq!(response.header("missing"), None);
    }
}
