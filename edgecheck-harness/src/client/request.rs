//! Requests issued against the edge.

use edgecheck_core::HarnessError;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use url::Url;

/// A request to send through the [`EdgeClient`](super::EdgeClient).
///
/// Requests are plain values so that a scenario can send the same request
/// several times and compare what comes back.
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl EdgeRequest {
    /// A request with the given method and no headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A `GET` for `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Replace the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace the method by name, e.g. `PURGE`.
    pub fn with_method_name(self, method: &str) -> Result<Self, HarnessError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| HarnessError::InvalidRequest(format!("invalid method {method:?}")))?;
        Ok(self.with_method(method))
    }

    /// Set a header, replacing any earlier value.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HarnessError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replace the path, keeping the query string.
    pub fn with_path(mut self, path: &str) -> Self {
        self.url.set_path(path);
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers set explicitly on this request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HarnessError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HarnessError::InvalidRequest(format!("invalid header name {name:?}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| HarnessError::InvalidRequest(format!("invalid value for {name}: {value:?}")))?;
    Ok((header, value))
}
