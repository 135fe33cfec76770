//! Swappable request handlers for backend servers.
//!
//! A backend answers health probes itself and hands every other request to
//! whatever handler the running test installed. Tests swap handlers while the
//! server is serving, so the current handler lives behind an `ArcSwap`: a
//! request either sees the old handler or the new one, never a torn value.

use std::sync::Arc;

use arc_swap::ArcSwap;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};

use crate::report::ViolationSink;

/// A request as seen by a handler, with the body already collected.
pub type BackendRequest = Request<Bytes>;

/// The response a handler produces.
pub type BackendResponse = Response<Full<Bytes>>;

/// Handles one non-probe request.
pub trait BackendHandler: Send + Sync + 'static {
    /// Produce the response for `request`.
    fn handle(&self, request: &BackendRequest) -> BackendResponse;
}

impl<F> BackendHandler for F
where
    F: Fn(&BackendRequest) -> BackendResponse + Send + Sync + 'static,
{
    fn handle(&self, request: &BackendRequest) -> BackendResponse {
        self(request)
    }
}

/// The handler installed on start and after every reset: an empty `200`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl BackendHandler for DefaultHandler {
    fn handle(&self, _request: &BackendRequest) -> BackendResponse {
        empty(StatusCode::OK)
    }
}

/// Holds the handler currently installed on a backend.
pub struct HandlerSlot {
    current: ArcSwap<Box<dyn BackendHandler>>,
}

impl HandlerSlot {
    /// A slot holding the [`DefaultHandler`].
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Box::new(DefaultHandler) as Box<dyn BackendHandler>),
        }
    }

    /// Install `handler` for every following request.
    pub fn switch(&self, handler: impl BackendHandler) {
        let handler: Box<dyn BackendHandler> = Box::new(handler);
        self.current.store(Arc::new(handler));
    }

    /// Put the [`DefaultHandler`] back.
    pub fn reset(&self) {
        self.switch(DefaultHandler);
    }

    /// Run the current handler.
    pub fn handle(&self, request: &BackendRequest) -> BackendResponse {
        let handler = self.current.load_full();
        handler.handle(request)
    }
}

impl Default for HandlerSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// A response with the given status and body.
pub fn respond(status: StatusCode, body: impl Into<Bytes>) -> BackendResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// A `200` with the given body.
pub fn ok(body: impl Into<Bytes>) -> BackendResponse {
    respond(StatusCode::OK, body)
}

/// A response with the given status and no body.
pub fn empty(status: StatusCode) -> BackendResponse {
    respond(status, Bytes::new())
}

/// Set a header on a response, dropping it with a warning if it is not valid.
pub fn set_header(response: &mut BackendResponse, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            response.headers_mut().insert(name, value);
        }
        _ => tracing::warn!(name, value, "dropping invalid response header"),
    }
}

/// A header value from the request, if present and printable.
pub fn request_header<'r>(request: &'r BackendRequest, name: &str) -> Option<&'r str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// A handler for backends that must not see any traffic in a scenario.
///
/// Every request it receives is reported to `sink` as a failure of the
/// running test case, and answered with the backend name as body.
pub fn unexpected(backend: &str, sink: ViolationSink) -> impl BackendHandler {
    let backend = backend.to_string();
    move |request: &BackendRequest| {
        sink.record(format!(
            "Server {backend} received request {} {} and it shouldn't have",
            request.method(),
            request.uri()
        ));
        ok(backend.clone())
    }
}

/// A handler that always answers with the given status and body.
pub fn fixed(status: StatusCode, body: impl Into<Bytes>) -> impl BackendHandler {
    let body = body.into();
    move |_request: &BackendRequest| respond(status, body.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use hyper::Method;

    fn request(method: Method, path: &str) -> BackendRequest {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    async fn body_of(response: BackendResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn slot_starts_with_default_handler() {
        let slot = HandlerSlot::new();
        let response = slot.handle(&request(Method::GET, "/"));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn switch_and_reset() {
        let slot = HandlerSlot::new();
        slot.switch(fixed(StatusCode::NOT_FOUND, "gone"));
        let response = slot.handle(&request(Method::GET, "/x"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, "gone");

        slot.reset();
        assert_eq!(slot.handle(&request(Method::GET, "/x")).status(), StatusCode::OK);
    }

    #[test]
    fn unexpected_records_violation() {
        let sink = ViolationSink::default();
        let handler = unexpected("backup2", sink.clone());
        let response = handler.handle(&request(Method::POST, "/thing"));
        assert_eq!(response.status(), StatusCode::OK);

        let recorded = sink.drain();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains("Server backup2 received request POST /thing"));
    }

    #[test]
    fn invalid_header_is_dropped() {
        let mut response = ok("x");
        set_header(&mut response, "Cache-Control", "max-age=5");
        set_header(&mut response, "bad header", "v");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()["cache-control"], "max-age=5");
    }
}
