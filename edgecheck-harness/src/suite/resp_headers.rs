//! Cache-related response headers the edge sends to clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use edgecheck_core::Vendor;
use hyper::StatusCode;
use regex::Regex;

use super::{scenario, Scenario};
use crate::backend::handler::{ok, set_header};
use crate::backend::BackendRequest;
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("resp_header_age", age),
        scenario!("resp_header_x_served_by", x_served_by).only_for(Vendor::Fastly),
    ]
}

/// `Age` from origin is passed on and then grows while the object sits in
/// cache.
async fn age(h: &Harness, case: &mut TestCase) -> CaseResult {
    const ORIGIN_AGE: u64 = 100;
    const WAIT: Duration = Duration::from_secs(5);
    let expected_age = ORIGIN_AGE + WAIT.as_secs();

    h.reset_for(case).await?;
    let received = AtomicUsize::new(0);
    let sink = case.violations();
    h.origin().switch_handler(move |_request: &BackendRequest| {
        if received.fetch_add(1, Ordering::SeqCst) > 0 {
            sink.record("Unexpected subsequent request received at Origin");
        }
        let mut response = ok("cacheable request");
        set_header(&mut response, "Cache-Control", "max-age=1800, public");
        set_header(&mut response, "Age", &ORIGIN_AGE.to_string());
        response
    });

    let request = h.unique_get();
    let response = h.send(case, &request).await?;
    if response.status != StatusCode::OK {
        return Err(case.fatal(format!("Edge returned an unexpected status: {:?}", response.status)));
    }

    // Origin will not update Age; only the edge can.
    tokio::time::sleep(WAIT).await;
    let response = h.send(case, &request).await?;
    if response.status != StatusCode::OK {
        return Err(case.fatal(format!("Edge returned an unexpected status: {:?}", response.status)));
    }

    let header = response
        .header("Age")
        .ok_or_else(|| case.fatal("Age Header is not set"))?;
    let edge_age: u64 = header
        .parse()
        .map_err(|e| case.fatal(format!("Age header {header:?}: {e}")))?;
    if edge_age != expected_age {
        case.error(format!(
            "Age header from Edge is not as expected. Got {header:?}, expected '{expected_age}'"
        ));
    }
    Ok(())
}

/// `X-Served-By` names the cache node and its location.
async fn x_served_by(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let pattern = Regex::new("^cache-[a-z0-9]+-[A-Z]{3}$").map_err(|e| case.fatal(e.to_string()))?;

    let response = h.send(case, &h.unique_get()).await?;
    let header = response.header("X-Served-By").unwrap_or_default();
    if header.is_empty() {
        case.error("X-Served-By header has not been set by Edge");
    }
    if !pattern.is_match(header) {
        case.error(format!("X-Served-By is not as expected: got {header:?}"));
    }
    Ok(())
}
