//! Serving expired objects when origin cannot.

use std::time::Duration;

use hyper::StatusCode;

use super::{scenario, Scenario};
use crate::assertions::check_body;
use crate::backend::handler::{fixed, ok, set_header, unexpected};
use crate::backend::{BackendHandler, BackendRequest};
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

const STALE_BODY: &str = "going off like stilton";
const FRESH_BODY: &str = "as fresh as daisies";

const RESPONSE_TTL: Duration = Duration::from_secs(2);
/// Long enough for the object to be well past its TTL.
const PAST_TTL: Duration = Duration::from_secs(10);
/// Long enough for the edge to mark a stopped origin unhealthy.
const HEALTH_CHECK_EXPIRY: Duration = Duration::from_secs(20);
/// Long enough for the edge to stop avoiding an origin that sent a 5xx.
const BACK_OFF_EXPIRY: Duration = Duration::from_secs(5);

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!(
            "serve_stale_origin_down_health_check_not_expired_replace",
            origin_down_health_check_not_expired_replace
        )
        .needs_failover(),
        scenario!(
            "serve_stale_origin_down_health_check_has_expired",
            origin_down_health_check_has_expired
        )
        .needs_failover(),
        scenario!("serve_stale_origin_5xx", origin_5xx).needs_failover(),
    ]
}

/// Origin handler returning `body` cacheable for [`RESPONSE_TTL`].
fn short_lived(body: &'static str) -> impl BackendHandler {
    let cache_control = format!("max-age={}", RESPONSE_TTL.as_secs());
    move |_request: &BackendRequest| {
        let mut response = ok(body);
        set_header(&mut response, "Cache-Control", &cache_control);
        response
    }
}

/// Origin down before the edge noticed: the first mirror answers and its
/// response replaces the stale object, which is then served from cache even
/// after origin is back.
///
/// Serving stale straight away would be better, but this is how edges behave
/// today and the scenario pins it down.
async fn origin_down_health_check_not_expired_replace(
    h: &Harness,
    case: &mut TestCase,
) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;
    second.switch_handler(unexpected(second.name(), case.violations()));

    let request = h.unique_get();

    // Request 1 populates the cache.
    origin.switch_handler(short_lived(STALE_BODY));
    first.switch_handler(unexpected(first.name(), case.violations()));
    let response = h.send(case, &request).await?;
    check_body(case, "Request 1", &response, STALE_BODY);

    // Request 2 comes from the mirror and replaces the stale object.
    tokio::time::sleep(PAST_TTL).await;
    origin.stop().await;
    first.switch_handler(fixed(StatusCode::OK, FRESH_BODY));
    let response = h.send(case, &request).await?;
    check_body(case, "Request 2", &response, FRESH_BODY);

    // Request 3 still comes from cache once origin is back.
    h.reset_for(case).await?;
    origin.switch_handler(unexpected(origin.name(), case.violations()));
    first.switch_handler(unexpected(first.name(), case.violations()));
    let response = h.send(case, &request).await?;
    check_body(case, "Request 3", &response, FRESH_BODY);

    Ok(())
}

/// Origin down long enough to be marked unhealthy: the expired object is
/// served and no mirror is asked.
async fn origin_down_health_check_has_expired(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;
    first.switch_handler(unexpected(first.name(), case.violations()));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let request = h.unique_get();

    origin.switch_handler(short_lived(STALE_BODY));
    let response = h.send(case, &request).await?;
    check_body(case, "Request 1", &response, STALE_BODY);

    origin.stop().await;
    tokio::time::sleep(HEALTH_CHECK_EXPIRY).await;
    let response = h.send(case, &request).await?;
    check_body(case, "Request 2", &response, STALE_BODY);

    Ok(())
}

/// Origin answering 5xx: the expired object is served until the edge retries
/// origin and gets a fresh one.
async fn origin_5xx(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;
    first.switch_handler(unexpected(first.name(), case.violations()));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let request = h.unique_get();
    for request_count in 1..=5 {
        let expected = match request_count {
            1 => {
                origin.switch_handler(short_lived(STALE_BODY));
                STALE_BODY
            }
            2 => {
                tokio::time::sleep(PAST_TTL).await;
                origin.switch_handler(fixed(StatusCode::SERVICE_UNAVAILABLE, origin.name().to_string()));
                STALE_BODY
            }
            3 | 4 => STALE_BODY,
            _ => {
                tokio::time::sleep(BACK_OFF_EXPIRY).await;
                origin.switch_handler(fixed(StatusCode::OK, FRESH_BODY));
                FRESH_BODY
            }
        };

        let response = h.send(case, &request).await?;
        check_body(case, &format!("Request {request_count}"), &response, expected);
    }
    Ok(())
}
