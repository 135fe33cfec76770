//! Request headers the edge adds or must leave alone.

use std::net::IpAddr;

use super::{scenario, Scenario};
use crate::backend::handler::DefaultHandler;
use crate::harness::Harness;
use crate::recorder::RequestLog;
use crate::report::{CaseResult, TestCase};

const SPOOFED_IP: &str = "203.0.113.99";

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("req_header_xff_create_and_append", xff_create_and_append),
        scenario!("req_header_unspoofable_client_ip", unspoofable_client_ip),
        scenario!("req_header_host_unmodified", host_unmodified),
    ]
}

fn recording_origin(h: &Harness) -> RequestLog {
    let log = RequestLog::default();
    h.origin()
        .switch_handler(log.recording(h.origin().name(), DefaultHandler));
    log
}

/// `X-Forwarded-For` is created with the client address, then appended to
/// when the client sends one. Does not hold when run behind a proxy that sets
/// it too.
async fn xff_create_and_append(h: &Harness, case: &mut TestCase) -> CaseResult {
    const HEADER: &str = "X-Forwarded-For";

    h.reset_for(case).await?;
    let log = recording_origin(h);
    let origin = h.origin().name();

    h.send(case, &h.unique_get()).await?;
    let received = log
        .last(origin)
        .and_then(|r| r.header(HEADER).map(str::to_string))
        .ok_or_else(|| case.fatal(format!("Origin didn't receive request with {HEADER:?} header")))?;

    let our_ip: IpAddr = received.parse().map_err(|_| {
        case.fatal(format!(
            "Expected origin to receive {HEADER:?} header with single IP. Got {received:?}"
        ))
    })?;

    let expected = format!("{SPOOFED_IP}, {our_ip}");
    let request = case.require(h.unique_get().with_header(HEADER, SPOOFED_IP))?;
    h.send(case, &request).await?;

    let received = log
        .last(origin)
        .and_then(|r| r.header(HEADER).map(str::to_string))
        .unwrap_or_default();
    if received != expected {
        case.error(format!(
            "Origin received {HEADER:?} header with wrong value. Expected {expected:?}, got {received:?}"
        ));
    }
    Ok(())
}

/// `True-Client-IP` carries the real client address, whatever the client
/// claims.
async fn unspoofable_client_ip(h: &Harness, case: &mut TestCase) -> CaseResult {
    const HEADER: &str = "True-Client-IP";

    h.reset_for(case).await?;
    let log = recording_origin(h);

    let request = case.require(h.unique_get().with_header(HEADER, SPOOFED_IP))?;
    h.send(case, &request).await?;

    let received = log
        .last(h.origin().name())
        .and_then(|r| r.header(HEADER).map(str::to_string))
        .unwrap_or_default();
    let received_ip: IpAddr = received.parse().map_err(|_| {
        case.fatal(format!("Origin received {HEADER:?} header with non-IP value {received:?}"))
    })?;

    let spoofed: Option<IpAddr> = SPOOFED_IP.parse().ok();
    if Some(received_ip) == spoofed {
        case.error(format!(
            "Origin received {HEADER:?} header with unmodified value {received_ip:?}"
        ));
    }
    Ok(())
}

/// `Host` reaches origin exactly as the client sent it.
async fn host_unmodified(h: &Harness, case: &mut TestCase) -> CaseResult {
    h.reset_for(case).await?;
    let log = recording_origin(h);
    let sent = h.requests().host_header();

    h.send(case, &h.unique_get()).await?;

    let received = log
        .last(h.origin().name())
        .and_then(|r| r.host().map(str::to_string))
        .unwrap_or_default();
    if received != sent {
        case.error(format!(
            "Origin received \"Host\" header with modified value. Expected {sent:?}, got {received:?}"
        ));
    }
    Ok(())
}
