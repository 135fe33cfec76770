//! What the edge caches, and for how long.

use std::io::{Read, Write};
use std::time::{Duration, SystemTime};

use edgecheck_core::Vendor;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::StatusCode;

use super::{scenario, Scenario};
use crate::assertions::{callback, check_header, requests_cached_duration, requests_cached_indefinite};
use crate::backend::handler::{empty, ok, request_header, respond, set_header};
use crate::backend::BackendRequest;
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

const CACHE_DURATION: Duration = Duration::from_secs(5);

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("cache_first_response", first_response),
        scenario!("cache_expires", expires),
        scenario!("cache_cache_control_max_age", cache_control_max_age),
        scenario!("cache_expires_and_max_age", expires_and_max_age),
        scenario!("cache_404_response", not_found_response),
        scenario!("cache_vary", vary).not_for(Vendor::Cloudflare),
        scenario!("cache_accept_encoding_gzip", accept_encoding_gzip),
        scenario!("cache_unique_query_params", unique_query_params),
        scenario!("cache_unique_case_sensitive", unique_case_sensitive),
    ]
}

/// A response without cache headers is cached for an unspecified time.
async fn first_response(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let request = h.unique_get();
    requests_cached_indefinite(h, case, &request, None).await
}

/// `Expires` sets the cache lifetime.
async fn expires(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let respond = callback(|response| {
        let expires = httpdate::fmt_http_date(SystemTime::now() + CACHE_DURATION);
        set_header(response, "Expires", &expires);
    });
    let request = h.unique_get();
    requests_cached_duration(h, case, &request, Some(respond), CACHE_DURATION).await
}

/// `Cache-Control: max-age` sets the cache lifetime.
async fn cache_control_max_age(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let max_age = format!("max-age={}", CACHE_DURATION.as_secs());
    let respond = callback(move |response| set_header(response, "Cache-Control", &max_age));
    let request = h.unique_get();
    requests_cached_duration(h, case, &request, Some(respond), CACHE_DURATION).await
}

/// `max-age` wins over a longer `Expires`.
async fn expires_and_max_age(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let max_age = format!("max-age={}", CACHE_DURATION.as_secs());
    let respond = callback(move |response| {
        let expires = httpdate::fmt_http_date(SystemTime::now() + CACHE_DURATION * 2);
        set_header(response, "Expires", &expires);
        set_header(response, "Cache-Control", &max_age);
    });
    let request = h.unique_get();
    requests_cached_duration(h, case, &request, Some(respond), CACHE_DURATION).await
}

/// 404s are cached like any other response; they can be expensive to produce.
async fn not_found_response(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let respond = callback(|response| *response.status_mut() = StatusCode::NOT_FOUND);
    let request = h.unique_get();
    requests_cached_indefinite(h, case, &request, Some(respond)).await
}

/// `Vary` keeps one cached variant per value of the named request header.
async fn vary(h: &Harness, case: &mut TestCase) -> CaseResult {
    const REQ_HEADER: &str = "CustomThing";
    const RESP_HEADER: &str = "Reflected-CustomThing";
    const VALUES: [&str; 3] = ["first distinct", "second distinct", "third distinct"];

    h.reset_for(case).await?;
    let base = h.unique_get();

    for populate_cache in [true, false] {
        for value in VALUES {
            if populate_cache {
                h.origin().switch_handler(|request: &BackendRequest| {
                    let mut response = empty(StatusCode::OK);
                    set_header(&mut response, "Vary", REQ_HEADER);
                    let reflected = request_header(request, REQ_HEADER).unwrap_or_default();
                    set_header(&mut response, RESP_HEADER, reflected);
                    response
                });
            } else {
                let sink = case.violations();
                h.origin().switch_handler(move |_request: &BackendRequest| {
                    sink.record("Request should not have made it to origin");
                    let mut response = empty(StatusCode::OK);
                    set_header(&mut response, RESP_HEADER, "not cached");
                    response
                });
            }

            let request = case.require(base.clone().with_header(REQ_HEADER, value))?;
            let response = h.send(case, &request).await?;
            check_header(case, "Request", &response, RESP_HEADER, value);
        }
    }
    Ok(())
}

/// Clients asking for gzip get gzip; other clients get plain text. The edge
/// may ask origin for gzip even when the client did not.
async fn accept_encoding_gzip(h: &Harness, case: &mut TestCase) -> CaseResult {
    const EXPECTED_BODY: &str = "may or may not be gzipped";

    h.reset_for(case).await?;
    let base = h.unique_get();

    for populate_cache in [true, false] {
        for gzip_content in [false, true] {
            let (accept_encoding, expected_encoding) = if gzip_content {
                ("gzip", "gzip")
            } else {
                ("somethingelse", "")
            };

            if populate_cache {
                h.origin().switch_handler(|request: &BackendRequest| {
                    if request_header(request, "Accept-Encoding") != Some("gzip") {
                        let mut response = ok(EXPECTED_BODY);
                        set_header(&mut response, "Vary", "Accept-Encoding");
                        return response;
                    }
                    match gzip(EXPECTED_BODY.as_bytes()) {
                        Ok(compressed) => {
                            let mut response = ok(compressed);
                            set_header(&mut response, "Vary", "Accept-Encoding");
                            set_header(&mut response, "Content-Encoding", "gzip");
                            set_header(&mut response, "Content-Type", "text/plain; charset=utf-8");
                            response
                        }
                        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                });
            } else {
                let sink = case.violations();
                h.origin().switch_handler(move |_request: &BackendRequest| {
                    sink.record("Request should not have made it to origin");
                    ok("uncached response")
                });
            }

            let request = case.require(base.clone().with_header("Accept-Encoding", accept_encoding))?;
            let response = h.send(case, &request).await?;

            let encoding = response.header("Content-Encoding").unwrap_or_default();
            if encoding != expected_encoding {
                return Err(case.fatal(format!(
                    "Request received incorrect Content-Encoding header. Expected {expected_encoding:?}, got {encoding:?}"
                )));
            }

            let body = if gzip_content {
                gunzip(&response.body).map_err(|e| case.fatal(format!("decompressing body: {e}")))?
            } else {
                response.text().into_owned()
            };
            if body != EXPECTED_BODY {
                case.error(format!(
                    "Request received incorrect response body. Expected {EXPECTED_BODY:?}, got {body:?}"
                ));
            }
        }
    }
    Ok(())
}

/// Same path with different query strings are cached separately.
async fn unique_query_params(h: &Harness, case: &mut TestCase) -> CaseResult {
    const RESP_HEADER: &str = "Request-RawQuery";

    h.reset_for(case).await?;
    let first = h.unique_get();
    let second = h.unique_get();

    if first.url().path() != second.url().path() {
        return Err(case.fatal(format!(
            "Request paths do not match. Expected {:?}, got {:?}",
            first.url().path(),
            second.url().path()
        )));
    }
    if first.url().query() == second.url().query() {
        return Err(case.fatal(format!(
            "Request query params do not differ. Expected {:?} != {:?}",
            first.url().query(),
            second.url().query()
        )));
    }

    for populate_cache in [true, false] {
        for request in [&first, &second] {
            if populate_cache {
                h.origin().switch_handler(|request: &BackendRequest| {
                    let mut response = empty(StatusCode::OK);
                    set_header(&mut response, RESP_HEADER, request.uri().query().unwrap_or_default());
                    response
                });
            } else {
                let sink = case.violations();
                h.origin().switch_handler(move |request: &BackendRequest| {
                    sink.record(format!(
                        "Request with query param {:?} should not have made it to origin",
                        request.uri().query().unwrap_or_default()
                    ));
                    empty(StatusCode::OK)
                });
            }

            let response = h.send(case, request).await?;
            let expected = request.url().query().unwrap_or_default();
            check_header(case, "Request", &response, RESP_HEADER, expected);
        }
    }
    Ok(())
}

/// Paths differing only in case are cached separately.
async fn unique_case_sensitive(h: &Harness, case: &mut TestCase) -> CaseResult {
    const REQ_PATH: &str = "/CaseSensitive";
    const RESP_HEADER: &str = "Request-Path";

    h.reset_for(case).await?;
    let base = h.unique_get();
    let lower = base.clone().with_path(&REQ_PATH.to_lowercase());
    let upper = base.with_path(&REQ_PATH.to_uppercase());

    if lower.url().path() == upper.url().path() {
        return Err(case.fatal(format!(
            "Request paths do not differ. Expected {:?} != {:?}",
            lower.url().path(),
            upper.url().path()
        )));
    }

    for populate_cache in [true, false] {
        for request in [&lower, &upper] {
            if populate_cache {
                h.origin().switch_handler(|request: &BackendRequest| {
                    let mut response = empty(StatusCode::OK);
                    set_header(&mut response, RESP_HEADER, request.uri().path());
                    response
                });
            } else {
                let sink = case.violations();
                h.origin().switch_handler(move |request: &BackendRequest| {
                    sink.record(format!(
                        "Request with path {:?} should not have made it to origin",
                        request.uri().path()
                    ));
                    empty(StatusCode::OK)
                });
            }

            let response = h.send(case, request).await?;
            check_header(case, "Request", &response, RESP_HEADER, request.url().path());
        }
    }
    Ok(())
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<String> {
    let mut decoded = String::new();
    GzDecoder::new(data).read_to_string(&mut decoded)?;
    Ok(decoded)
}
