//! Protocol enforcement at the edge.

use hyper::StatusCode;

use super::{scenario, Scenario};
use crate::assertions::{check_body, check_header, check_status};
use crate::backend::handler::{ok, unexpected};
use crate::backend::BackendRequest;
use crate::client::EdgeRequest;
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("misc_protocol_redirect", protocol_redirect),
        scenario!("misc_restrict_purge_requests", restrict_purge_requests),
    ]
}

/// Plain HTTP is redirected to HTTPS without reaching origin.
async fn protocol_redirect(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    h.origin().switch_handler(unexpected(h.origin().name(), case.violations()));

    let source = case.require(h.requests().url_with_scheme("http", "/foo/bar"))?;
    let destination = h.requests().url_for_path("/foo/bar");

    let response = h.send(case, &EdgeRequest::get(source)).await?;
    check_status(case, "Request", &response, StatusCode::MOVED_PERMANENTLY);
    check_header(case, "Request", &response, "Location", destination.as_str());
    Ok(())
}

/// `PURGE` from an address that is not whitelisted is refused and leaves the
/// cached object in place. Assumes the harness is not run from a whitelisted
/// address.
async fn restrict_purge_requests(h: &Harness, case: &mut TestCase) -> CaseResult {
    const CACHED_BODY: &str = "this should not be purged";

    h.reset_for(case).await?;
    let request = h.unique_get();

    h.origin()
        .switch_handler(|_request: &BackendRequest| ok(CACHED_BODY));
    let response = h.send(case, &request).await?;
    check_status(case, "Request 1", &response, StatusCode::OK);
    check_body(case, "Request 1", &response, CACHED_BODY);

    h.origin().switch_handler(unexpected(h.origin().name(), case.violations()));
    let purge = case.require(request.clone().with_method_name("PURGE"))?;
    let response = h.send(case, &purge).await?;
    check_status(case, "Request 2", &response, StatusCode::FORBIDDEN);

    let response = h.send(case, &request).await?;
    check_status(case, "Request 3", &response, StatusCode::OK);
    check_body(case, "Request 3", &response, CACHED_BODY);
    Ok(())
}
