//! Shared helpers for the harness integration tests.

#![allow(unused)]

pub mod mock_edge;

use std::net::TcpListener;
use std::time::Duration;

use edgecheck_core::{ConvergencePolicy, UniqueRequestFactory};
use edgecheck_harness::{BackendFleet, BackendServer, ClientOptions, EdgeClient, Harness};

use mock_edge::MockEdge;

/// Convergence budget sized for a local edge that probes every few
/// milliseconds.
pub const FAST_POLICY: ConvergencePolicy = ConvergencePolicy {
    max_retries: 100,
    attempt_interval: Duration::from_millis(50),
    propagation_grace: Duration::from_millis(100),
};

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

/// Client with no pinning, for talking to loopback addresses.
pub fn local_client() -> EdgeClient {
    EdgeClient::new(ClientOptions::default()).unwrap()
}

/// Plain HTTP client that never follows redirects.
pub fn raw_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Origin and both mirrors on plain HTTP, each on its own free port.
pub fn plain_fleet() -> BackendFleet {
    let backends = ["origin", "backup1", "backup2"]
        .into_iter()
        .map(|name| BackendServer::new(name, free_port(), None).unwrap())
        .collect();
    BackendFleet::new(backends).unwrap()
}

/// A harness whose edge is a [`MockEdge`] in front of a fresh plain fleet.
pub async fn local_harness() -> (Harness, MockEdge) {
    let fleet = plain_fleet();
    let upstreams: Vec<(String, u16)> = fleet
        .backends()
        .iter()
        .map(|b| (b.name().to_string(), b.port()))
        .collect();
    let edge = MockEdge::start(upstreams).await;

    let requests = UniqueRequestFactory::new(edge.base_url()).unwrap();
    let harness = Harness::new(local_client(), requests, fleet).with_policy(FAST_POLICY);
    (harness, edge)
}
