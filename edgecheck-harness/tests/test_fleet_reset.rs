//! Fleet reset and edge convergence against a local mock edge.

mod utils;

use std::time::Duration;

use edgecheck_core::{ConvergencePolicy, HarnessError, Lifecycle, UniqueRequestFactory};
use edgecheck_harness::{BackendFleet, BackendServer, ConvergencePoller, EdgeRequest, Harness};
use url::Url;
use utils::mock_edge::MockEdge;
use utils::{free_port, local_client, local_harness};

async fn served_by(h: &Harness) -> Option<String> {
    let response = h.client().round_trip(&h.unique_get()).await.unwrap();
    response.backend_name().map(str::to_string)
}

#[tokio::test]
async fn cold_reset_converges_on_origin() {
    let (h, edge) = local_harness().await;
    h.reset().await.unwrap();

    for backend in h.fleet().backends() {
        assert_eq!(backend.lifecycle(), Lifecycle::Started);
        assert!(edge.is_healthy(backend.name()));
    }
    assert_eq!(served_by(&h).await.as_deref(), Some("origin"));

    h.stop_all().await;
}

#[tokio::test]
async fn reset_is_idempotent() {
    let (h, _edge) = local_harness().await;
    h.reset().await.unwrap();
    let ports: Vec<u16> = h.fleet().backends().iter().map(|b| b.port()).collect();

    h.reset().await.unwrap();
    assert_eq!(served_by(&h).await.as_deref(), Some("origin"));
    let after: Vec<u16> = h.fleet().backends().iter().map(|b| b.port()).collect();
    assert_eq!(ports, after);

    h.stop_all().await;
}

#[tokio::test]
async fn reset_restores_stopped_backends() {
    let (h, _edge) = local_harness().await;
    h.reset().await.unwrap();

    // Only the second mirror is down: everything ahead of it is cycled.
    h.mirror(2).unwrap().stop().await;
    h.reset().await.unwrap();
    assert!(h.fleet().backends().iter().all(BackendServer::is_started));
    assert_eq!(served_by(&h).await.as_deref(), Some("origin"));

    h.stop_all().await;
    h.reset().await.unwrap();
    assert_eq!(served_by(&h).await.as_deref(), Some("origin"));

    h.stop_all().await;
}

#[tokio::test]
async fn reset_puts_default_handlers_back() {
    let (h, _edge) = local_harness().await;
    h.reset().await.unwrap();

    h.origin().switch_handler(edgecheck_harness::backend::handler::fixed(
        hyper::StatusCode::IM_A_TEAPOT,
        "short and stout",
    ));
    let response = h.client().round_trip(&h.unique_get()).await.unwrap();
    assert_eq!(response.status, hyper::StatusCode::IM_A_TEAPOT);

    h.reset().await.unwrap();
    let response = h.client().round_trip(&h.unique_get()).await.unwrap();
    assert_eq!(response.status, hyper::StatusCode::OK);
    assert!(response.body.is_empty());

    h.stop_all().await;
}

#[tokio::test]
async fn edge_that_never_routes_is_not_converged() {
    // The edge fronts a port nobody listens on.
    let edge = MockEdge::start(vec![("elsewhere".to_string(), free_port())]).await;
    let backend = BackendServer::new("origin", free_port(), None).unwrap();
    let fleet = BackendFleet::new(vec![backend]).unwrap();
    let requests = UniqueRequestFactory::new(edge.base_url()).unwrap();
    let policy = ConvergencePolicy {
        max_retries: 3,
        attempt_interval: Duration::from_millis(10),
        propagation_grace: Duration::from_millis(10),
    };
    let h = Harness::new(local_client(), requests, fleet).with_policy(policy);

    match h.reset().await {
        Err(HarnessError::NotConverged { backend, attempts }) => {
            assert_eq!(backend, "origin");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected NotConverged, got {other:?}"),
    }
    h.stop_all().await;
}

#[tokio::test]
async fn unreachable_edge_fails_fast() {
    let base = Url::parse(&format!("http://127.0.0.1:{}/", free_port())).unwrap();
    let requests = UniqueRequestFactory::new(base).unwrap();
    let poller = ConvergencePoller::with_policy(
        local_client(),
        requests.clone(),
        ConvergencePolicy {
            max_retries: 50,
            attempt_interval: Duration::from_secs(1),
            propagation_grace: Duration::from_secs(1),
        },
    );

    let started = std::time::Instant::now();
    let err = poller.wait_for_backend("origin").await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(1));

    // The plain client reaches the same conclusion.
    let err = local_client()
        .round_trip(&EdgeRequest::get(requests.unique_url()))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}
