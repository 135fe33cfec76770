//! Scenarios that only make sense against Fastly.

use edgecheck_core::Vendor;
use hyper::StatusCode;

use super::{scenario, Scenario};
use crate::backend::handler::empty;
use crate::backend::BackendRequest;
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

const UP_DOWN_CYCLES: usize = 20;

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![scenario!("fastly_up_down", up_down).only_for(Vendor::Fastly)]
}

/// The edge follows the fleet going up and down repeatedly: 200 while it
/// is up, 503 once everything is stopped.
async fn up_down(h: &Harness, case: &mut TestCase) -> CaseResult {
    for cycle in 1..=UP_DOWN_CYCLES {
        h.reset_for(case).await?;
        for backend in h.fleet().backends() {
            let name = backend.name().to_string();
            backend.switch_handler(move |request: &BackendRequest| {
                tracing::info!(backend = %name, uri = %request.uri(), "request received");
                empty(StatusCode::OK)
            });
        }
        expect_status(h, case, &format!("{cycle}:up"), StatusCode::OK).await?;

        h.stop_all().await;
        expect_status(h, case, &format!("{cycle}:down"), StatusCode::SERVICE_UNAVAILABLE).await?;
    }
    Ok(())
}

async fn expect_status(
    h: &Harness,
    case: &mut TestCase,
    ident: &str,
    expected: StatusCode,
) -> CaseResult {
    let response = h.send(case, &h.unique_get()).await?;
    case.log(format!(
        "req {ident} X-Served-By: {}",
        response.header("X-Served-By").unwrap_or_default()
    ));
    if response.status != expected {
        case.error(format!(
            "req {ident} wrong status code. Expected {}, got {}",
            expected.as_u16(),
            response.status.as_u16()
        ));
    }
    Ok(())
}
