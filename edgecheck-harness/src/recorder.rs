//! Records the requests each backend receives.
//!
//! Scenarios assert on what reached origin and mirrors (how many requests,
//! which headers) after the edge has answered. Handlers run on server tasks,
//! so the log is a concurrent map keyed by backend name.

use std::sync::Arc;

use dashmap::DashMap;
use hyper::header::{HeaderMap, HOST};
use hyper::Method;

use crate::backend::{BackendHandler, BackendRequest, BackendResponse};

/// One request as seen by a backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RecordedRequest {
    fn from_request(request: &BackendRequest) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            headers: request.headers().clone(),
        }
    }

    /// First value of a header, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Host` the request was addressed to.
    pub fn host(&self) -> Option<&str> {
        self.header(HOST.as_str())
    }
}

/// Shared log of backend traffic. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    entries: Arc<DashMap<String, Vec<RecordedRequest>>>,
}

impl RequestLog {
    /// Append `request` to the entries of `backend`.
    pub fn record(&self, backend: &str, request: &BackendRequest) {
        self.entries
            .entry(backend.to_string())
            .or_default()
            .push(RecordedRequest::from_request(request));
    }

    /// Wrap `handler` so every request it handles is recorded under `backend`.
    pub fn recording(&self, backend: &str, handler: impl BackendHandler) -> impl BackendHandler {
        let log = self.clone();
        let backend = backend.to_string();
        move |request: &BackendRequest| -> BackendResponse {
            log.record(&backend, request);
            handler.handle(request)
        }
    }

    /// Requests `backend` received.
    pub fn count(&self, backend: &str) -> usize {
        self.entries.get(backend).map_or(0, |e| e.len())
    }

    /// Most recent request `backend` received.
    pub fn last(&self, backend: &str) -> Option<RecordedRequest> {
        self.entries.get(backend).and_then(|e| e.last().cloned())
    }

    /// Every request `backend` received, oldest first.
    pub fn all(&self, backend: &str) -> Vec<RecordedRequest> {
        self.entries
            .get(backend)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
