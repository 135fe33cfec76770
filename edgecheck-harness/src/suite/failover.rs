//! Falling back from origin to the mirrors.

use std::sync::atomic::{AtomicBool, Ordering};

use hyper::StatusCode;

use super::{scenario, Scenario};
use crate::assertions::{check_body, check_status};
use crate::backend::handler::{fixed, ok, respond, set_header, unexpected};
use crate::backend::{BackendHandler, BackendRequest};
use crate::harness::Harness;
use crate::recorder::RequestLog;
use crate::report::{CaseResult, TestCase, ViolationSink};

const LUCKY_BODY: &str = "lucky golden ticket";

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("failover_error_page_all_servers_down", error_page_all_servers_down).needs_failover(),
        scenario!("failover_error_page_all_servers_5xx", error_page_all_servers_5xx).needs_failover(),
        scenario!("failover_origin_5xx_back_off", origin_5xx_back_off).needs_failover(),
        scenario!("failover_origin_down_use_first_mirror", origin_down_use_first_mirror).needs_failover(),
        scenario!("failover_origin_5xx_use_first_mirror", origin_5xx_use_first_mirror).needs_failover(),
        scenario!(
            "failover_origin_down_first_mirror_down_use_second_mirror",
            origin_down_first_mirror_down_use_second_mirror
        )
        .needs_failover(),
        scenario!(
            "failover_origin_5xx_first_mirror_5xx_use_second_mirror",
            origin_5xx_first_mirror_5xx_use_second_mirror
        )
        .needs_failover(),
        scenario!("failover_no_fallback_header", no_fallback_header).needs_failover(),
    ]
}

/// Answers the first request with `status` and `body`; any later request is a
/// failure.
fn first_request_only(
    backend: &str,
    sink: ViolationSink,
    status: StatusCode,
    body: &'static str,
) -> impl BackendHandler {
    let backend = backend.to_string();
    let seen = AtomicBool::new(false);
    move |_request: &BackendRequest| {
        if seen.swap(true, Ordering::SeqCst) {
            sink.record(format!("Server {backend} received more than one request"));
            return ok(backend.clone());
        }
        respond(status, body)
    }
}

fn check_hit_once(case: &mut TestCase, log: &RequestLog, backends: &[&str]) {
    for backend in backends {
        let count = log.count(backend);
        if count != 1 {
            case.error(format!(
                "Server {backend} received the wrong number of requests. Expected 1, got {count}"
            ));
        }
    }
}

/// With every backend down and nothing cached, the edge serves its own error
/// page.
async fn error_page_all_servers_down(h: &Harness, case: &mut TestCase) -> CaseResult {
    const EXPECTED_BODY: &str = "Guru Meditation";

    h.reset_for(case).await?;
    h.failover_fleet(case)?;
    h.stop_all().await;

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::SERVICE_UNAVAILABLE);
    let body = response.text();
    if !body.contains(EXPECTED_BODY) {
        case.error(format!(
            "Received incorrect response body. Expected to contain {EXPECTED_BODY:?}, got {body:?}"
        ));
    }
    Ok(())
}

/// When every backend answers 5xx, the last mirror's response is returned.
async fn error_page_all_servers_5xx(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;

    origin.switch_handler(fixed(StatusCode::SERVICE_UNAVAILABLE, origin.name().to_string()));
    first.switch_handler(fixed(StatusCode::SERVICE_UNAVAILABLE, first.name().to_string()));
    second.switch_handler(fixed(StatusCode::SERVICE_UNAVAILABLE, LUCKY_BODY));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::SERVICE_UNAVAILABLE);
    check_body(case, "Request", &response, LUCKY_BODY);
    Ok(())
}

/// After a 5xx from origin the edge backs off it briefly and goes straight to
/// the first mirror.
async fn origin_5xx_back_off(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;

    first.switch_handler(fixed(StatusCode::OK, LUCKY_BODY));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let request = h.unique_get();
    for request_count in 1..=20 {
        match request_count {
            // Hits origin but is served from the first mirror.
            1 => origin.switch_handler(fixed(StatusCode::SERVICE_UNAVAILABLE, origin.name().to_string())),
            // Served from the first mirror without asking origin.
            2 => origin.switch_handler(unexpected(origin.name(), case.violations())),
            _ => {}
        }

        let response = h.send(case, &request).await?;
        let what = format!("Request {request_count}");
        check_status(case, &what, &response, StatusCode::OK);
        check_body(case, &what, &response, LUCKY_BODY);
    }
    Ok(())
}

/// Origin down and nothing cached: the first mirror answers.
async fn origin_down_use_first_mirror(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;

    origin.stop().await;
    first.switch_handler(fixed(StatusCode::OK, LUCKY_BODY));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::OK);
    check_body(case, "Request", &response, LUCKY_BODY);
    Ok(())
}

/// Origin 5xx and nothing cached: the first mirror answers, each asked once.
async fn origin_5xx_use_first_mirror(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;
    let log = RequestLog::default();
    let sink = case.violations();

    origin.switch_handler(log.recording(
        origin.name(),
        first_request_only(origin.name(), sink.clone(), StatusCode::SERVICE_UNAVAILABLE, "origin"),
    ));
    first.switch_handler(log.recording(
        first.name(),
        first_request_only(first.name(), sink, StatusCode::OK, LUCKY_BODY),
    ));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::OK);
    check_body(case, "Request", &response, LUCKY_BODY);
    check_hit_once(case, &log, &[origin.name(), first.name()]);
    Ok(())
}

/// Origin and first mirror down: the second mirror answers.
async fn origin_down_first_mirror_down_use_second_mirror(
    h: &Harness,
    case: &mut TestCase,
) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;

    origin.stop().await;
    first.stop().await;
    second.switch_handler(fixed(StatusCode::OK, LUCKY_BODY));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::OK);
    check_body(case, "Request", &response, LUCKY_BODY);
    Ok(())
}

/// Origin and first mirror 5xx: the second mirror answers, each backend asked
/// exactly once.
async fn origin_5xx_first_mirror_5xx_use_second_mirror(
    h: &Harness,
    case: &mut TestCase,
) -> CaseResult {
    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;
    let log = RequestLog::default();
    let sink = case.violations();

    origin.switch_handler(log.recording(
        origin.name(),
        first_request_only(origin.name(), sink.clone(), StatusCode::SERVICE_UNAVAILABLE, "origin"),
    ));
    first.switch_handler(log.recording(
        first.name(),
        first_request_only(first.name(), sink.clone(), StatusCode::SERVICE_UNAVAILABLE, "backup1"),
    ));
    second.switch_handler(log.recording(
        second.name(),
        first_request_only(second.name(), sink, StatusCode::OK, LUCKY_BODY),
    ));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::OK);
    check_body(case, "Request", &response, LUCKY_BODY);
    check_hit_once(case, &log, &[origin.name(), first.name(), second.name()]);
    Ok(())
}

/// A 5xx carrying `No-Fallback` is passed on so applications can show their
/// own error pages.
async fn no_fallback_header(h: &Harness, case: &mut TestCase) -> CaseResult {
    const EXPECTED_BODY: &str = "custom error page";

    h.reset_for(case).await?;
    let [origin, first, second] = h.failover_fleet(case)?;

    origin.switch_handler(|_request: &BackendRequest| {
        let mut response = respond(StatusCode::SERVICE_UNAVAILABLE, EXPECTED_BODY);
        set_header(&mut response, "No-Fallback", "");
        response
    });
    first.switch_handler(unexpected(first.name(), case.violations()));
    second.switch_handler(unexpected(second.name(), case.violations()));

    let response = h.send(case, &h.unique_get()).await?;
    check_status(case, "Request", &response, StatusCode::SERVICE_UNAVAILABLE);
    check_body(case, "Request", &response, EXPECTED_BODY);
    Ok(())
}
