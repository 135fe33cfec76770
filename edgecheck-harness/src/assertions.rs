//! Reusable request/response checks.
//!
//! Each driver installs a handler on origin, sends requests through the edge
//! and records mismatches on the running [`TestCase`]. An optional
//! [`ResponseCallback`] lets a scenario add headers or change the status of
//! every origin response without rewriting the request loop.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edgecheck_core::HarnessError;
use hyper::body::Bytes;
use hyper::StatusCode;

use crate::backend::handler::{ok, set_header};
use crate::backend::{BackendRequest, BackendResponse};
use crate::client::{EdgeRequest, EdgeResponse};
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

/// Modifies an origin response before it is sent.
pub type ResponseCallback = Arc<dyn Fn(&mut BackendResponse) + Send + Sync>;

/// Box a closure as a [`ResponseCallback`].
pub fn callback(f: impl Fn(&mut BackendResponse) + Send + Sync + 'static) -> ResponseCallback {
    Arc::new(f)
}

const RESPONSE_CACHED: &str = "first response";
const RESPONSE_NOT_CACHED: &str = "subsequent response";
const NOT_CACHED_BODIES: [&str; 3] = ["first response", "second response", "third response"];

/// Three identical requests are answered from one origin response.
pub async fn requests_cached_indefinite(
    h: &Harness,
    case: &mut TestCase,
    request: &EdgeRequest,
    respond: Option<ResponseCallback>,
) -> CaseResult {
    requests_cached_duration(h, case, request, respond, Duration::ZERO).await
}

/// Three identical requests, the third sent after `ttl` (plus a quarter) has
/// passed.
///
/// With a zero `ttl` all three must come from one origin response. Otherwise
/// the first two share one origin response and the third must bring a new one.
pub async fn requests_cached_duration(
    h: &Harness,
    case: &mut TestCase,
    request: &EdgeRequest,
    respond: Option<ResponseCallback>,
    ttl: Duration,
) -> CaseResult {
    let expires = !ttl.is_zero();
    let ttl_with_buffer = ttl + ttl / 4;
    let expected_requests = if expires { 2 } else { 1 };

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    h.origin().switch_handler(move |_request: &BackendRequest| {
        let body = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            RESPONSE_CACHED
        } else {
            RESPONSE_NOT_CACHED
        };
        let mut response = ok(body);
        if let Some(respond) = &respond {
            respond(&mut response);
        }
        response
    });

    for request_count in 1..=3 {
        if expires && request_count == 3 {
            tokio::time::sleep(ttl_with_buffer).await;
        }

        let response = h.send(case, request).await?;
        let expected = if expires && request_count > 2 {
            RESPONSE_NOT_CACHED
        } else {
            RESPONSE_CACHED
        };
        check_body(case, &format!("Request {request_count}"), &response, expected);
    }

    let received = received.load(Ordering::SeqCst);
    if received != expected_requests {
        case.error(format!(
            "Origin received the wrong number of requests. Expected {expected_requests}, got {received}"
        ));
    }
    Ok(())
}

/// Three identical requests each reach origin and each get a different body.
pub async fn three_requests_not_cached(
    h: &Harness,
    case: &mut TestCase,
    request: &EdgeRequest,
    respond: Option<ResponseCallback>,
) -> CaseResult {
    let received = Arc::new(AtomicUsize::new(0));
    let sink = case.violations();
    h.origin().switch_handler(move |_request: &BackendRequest| {
        let count = received.fetch_add(1, Ordering::SeqCst);
        let mut response = match NOT_CACHED_BODIES.get(count) {
            Some(body) => ok(*body),
            None => {
                sink.record(format!("Origin received unexpected request {}", count + 1));
                ok("unexpected request")
            }
        };
        if let Some(respond) = &respond {
            respond(&mut response);
        }
        response
    });

    for (index, expected) in NOT_CACHED_BODIES.iter().enumerate() {
        let response = h.send(case, request).await?;
        check_body(case, &format!("Request {}", index + 1), &response, expected);
    }
    Ok(())
}

/// A file served by origin that must reach the client untouched.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    /// File name; also the request path.
    pub name: &'static str,
    /// Exact bytes.
    pub data: &'static [u8],
}

impl Fixture {
    /// `Content-Type` origin serves the fixture with, from its extension.
    pub fn content_type(&self) -> Result<&'static str, HarnessError> {
        let extension = Path::new(self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("html" | "htm") => Ok("text/html; charset=utf-8"),
            Some("css") => Ok("text/css; charset=utf-8"),
            Some("js") => Ok("application/x-javascript"),
            Some("png") => Ok("image/png"),
            Some("jpg" | "jpeg") => Ok("image/jpeg"),
            Some("gif") => Ok("image/gif"),
            other => Err(HarnessError::Fixture {
                path: self.name.to_string(),
                reason: format!("Unable to determine fixture Content-Type. Got {other:?}"),
            }),
        }
    }
}

/// Origin serves `fixture`; the body received through the edge must be
/// byte-for-byte the same.
pub async fn response_not_manipulated(h: &Harness, case: &mut TestCase, fixture: &Fixture) -> CaseResult {
    let content_type = case.require(fixture.content_type())?;
    let data = Bytes::from_static(fixture.data);
    h.origin().switch_handler(move |_request: &BackendRequest| {
        let mut response = ok(data.clone());
        set_header(&mut response, "Content-Type", content_type);
        response
    });

    let request = h.unique_get().with_path(&format!("/{}", fixture.name));
    let response = h.send(case, &request).await?;

    if response.body.as_ref() != fixture.data {
        case.error("Response body did not match fixture");
        case.error(format!(
            "Response body sizes for debug purposes. Expected {}, got {}",
            fixture.data.len(),
            response.body.len()
        ));
    }
    Ok(())
}

/// Record a failure unless the status is `expected`.
pub fn check_status(
    case: &mut TestCase,
    what: &str,
    response: &EdgeResponse,
    expected: StatusCode,
) -> bool {
    if response.status == expected {
        return true;
    }
    case.error(format!(
        "{what} received incorrect status code. Expected {}, got {}",
        expected.as_u16(),
        response.status.as_u16()
    ));
    false
}

/// Record a failure unless the body is exactly `expected`.
pub fn check_body(case: &mut TestCase, what: &str, response: &EdgeResponse, expected: &str) -> bool {
    if response.body.as_ref() == expected.as_bytes() {
        return true;
    }
    case.error(format!(
        "{what} received incorrect response body. Expected {expected:?}, got {:?}",
        response.text()
    ));
    false
}

/// Record a failure unless header `name` is exactly `expected`. A missing
/// header compares as empty.
pub fn check_header(
    case: &mut TestCase,
    what: &str,
    response: &EdgeResponse,
    name: &str,
    expected: &str,
) -> bool {
    let actual = response.header(name).unwrap_or_default();
    if actual == expected {
        return true;
    }
    case.error(format!(
        "{what} received wrong {name:?} header. Expected {expected:?}, got {actual:?}"
    ));
    false
}
