//! Backend server behaviour seen from a plain HTTP client.

mod utils;

use edgecheck_core::Lifecycle;
use edgecheck_harness::backend::handler::{empty, fixed, set_header, unexpected};
use edgecheck_harness::tls::{self, SELF_SIGNED_DNS_NAME};
use edgecheck_harness::{BackendRequest, BackendServer, ViolationSink};
use hyper::StatusCode;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use utils::raw_client;
use x509_parser::extensions::GeneralName;

fn plain_backend(name: &str) -> BackendServer {
    BackendServer::new(name, 0, None).unwrap()
}

#[tokio::test]
async fn handlers_control_status_and_headers() {
    let backend = plain_backend("origin");
    backend.start().await.unwrap();
    let client = raw_client();

    let cases = [
        (StatusCode::MOVED_PERMANENTLY, Some("https://example.com/moved")),
        (StatusCode::FOUND, Some("https://example.com/found")),
        (StatusCode::FORBIDDEN, None),
        (StatusCode::NOT_FOUND, None),
    ];
    for (status, location) in cases {
        backend.switch_handler(move |_request: &BackendRequest| {
            let mut response = empty(status);
            if let Some(location) = location {
                set_header(&mut response, "Location", location);
            }
            response
        });

        let response = client
            .get(format!("{}/foo", backend.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), status);
        assert_eq!(response.headers()["Backend-Name"], "origin");
        assert_eq!(
            response
                .headers()
                .get("Location")
                .map(|v| v.to_str().unwrap()),
            location
        );
    }

    backend.stop().await;
}

#[tokio::test]
async fn probe_never_reaches_handler() {
    let backend = plain_backend("backup1");
    backend.start().await.unwrap();
    let sink = ViolationSink::default();
    backend.switch_handler(unexpected(backend.name(), sink.clone()));
    let client = raw_client();

    let response = client.head(format!("{}/", backend.url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["PING"], "PONG");
    assert_eq!(response.headers()["Backend-Name"], "backup1");
    assert!(sink.drain().is_empty());

    // HEAD elsewhere and GET on / are ordinary requests.
    client.head(format!("{}/other", backend.url())).send().await.unwrap();
    let response = client.get(format!("{}/", backend.url())).send().await.unwrap();
    assert!(response.headers().get("PING").is_none());
    assert_eq!(sink.drain().len(), 2);

    backend.stop().await;
}

#[tokio::test]
async fn handler_may_set_its_own_identity() {
    let backend = plain_backend("origin");
    backend.start().await.unwrap();
    backend.switch_handler(|_request: &BackendRequest| {
        let mut response = empty(StatusCode::OK);
        set_header(&mut response, "Backend-Name", "impostor");
        response
    });
    let client = raw_client();

    let response = client.get(format!("{}/", backend.url())).send().await.unwrap();
    assert_eq!(response.headers().get_all("Backend-Name").iter().count(), 1);
    assert_eq!(response.headers()["Backend-Name"], "impostor");

    // Probes are always answered under the real name.
    let response = client.head(format!("{}/", backend.url())).send().await.unwrap();
    assert_eq!(response.headers()["Backend-Name"], "origin");

    backend.stop().await;
}

#[tokio::test]
async fn stopped_backend_refuses_connections() {
    let backend = plain_backend("origin");
    backend.start().await.unwrap();
    assert_eq!(backend.lifecycle(), Lifecycle::Started);

    backend.stop().await;
    assert_eq!(backend.lifecycle(), Lifecycle::Stopped);

    let err = raw_client()
        .get(format!("{}/", backend.url()))
        .send()
        .await
        .unwrap_err();
    assert!(err.is_connect(), "unexpected error: {err}");

    // Stopping again is a no-op.
    backend.stop().await;
}

#[tokio::test]
async fn random_port_is_kept_across_restarts() {
    let backend = plain_backend("backup2");
    assert_eq!(backend.port(), 0);

    let first = backend.start().await.unwrap();
    assert_ne!(first.port(), 0);
    assert_eq!(backend.port(), first.port());

    backend.switch_handler(fixed(StatusCode::NOT_FOUND, "gone"));
    backend.stop().await;
    let second = backend.start().await.unwrap();
    assert_eq!(second.port(), first.port());

    // A restart comes back with the default handler.
    let response = raw_client()
        .get(format!("{}/", backend.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());

    backend.stop().await;
}

#[tokio::test]
async fn start_twice_keeps_listener() {
    let backend = plain_backend("origin");
    let first = backend.start().await.unwrap();
    let second = backend.start().await.unwrap();
    assert_eq!(first, second);
    backend.stop().await;
}

#[test]
fn default_certificate_names_example_com_and_loopback() {
    let (cert, _key) = tls::generate_self_signed().unwrap();
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).unwrap();
    let san = parsed.subject_alternative_name().unwrap().unwrap();

    let mut dns = Vec::new();
    let mut ips = Vec::new();
    for name in &san.value.general_names {
        match name {
            GeneralName::DNSName(host) => dns.push(host.to_string()),
            GeneralName::IPAddress(bytes) => ips.push(match bytes.len() {
                4 => IpAddr::from(<[u8; 4]>::try_from(*bytes).unwrap()),
                _ => IpAddr::from(<[u8; 16]>::try_from(*bytes).unwrap()),
            }),
            _ => {}
        }
    }

    assert_eq!(dns, vec![SELF_SIGNED_DNS_NAME.to_string()]);
    assert!(ips.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert!(ips.contains(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
}

#[tokio::test]
async fn self_signed_backend_is_trusted_for_loopback() {
    let (cert, key) = tls::generate_self_signed().unwrap();
    let root = reqwest::Certificate::from_der(cert.as_ref()).unwrap();
    let config = tls::server_config(vec![cert], key).unwrap();
    let backend = BackendServer::new("origin", 0, Some(config)).unwrap();
    backend.start().await.unwrap();
    assert!(backend.url().starts_with("https://"));

    let client = reqwest::Client::builder()
        .no_proxy()
        .add_root_certificate(root)
        .build()
        .unwrap();
    let response = client.get(format!("{}/", backend.url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["Backend-Name"], "origin");

    backend.stop().await;
}

#[tokio::test]
async fn custom_certificate_overrides_default() {
    let custom = rcgen::generate_simple_self_signed(vec![
        "custom.test".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, custom.cert.pem()).unwrap();
    std::fs::write(&key_path, custom.key_pair.serialize_pem()).unwrap();

    let config = tls::load_tls_config(&cert_path, &key_path).unwrap();
    let backend = BackendServer::new("origin", 0, Some(config)).unwrap();
    backend.start().await.unwrap();

    let root = reqwest::Certificate::from_pem(custom.cert.pem().as_bytes()).unwrap();
    let client = reqwest::Client::builder()
        .no_proxy()
        .add_root_certificate(root)
        .build()
        .unwrap();
    let response = client.get(format!("{}/", backend.url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    backend.stop().await;
}

#[test]
fn certificate_without_key_is_rejected() {
    let custom = rcgen::generate_simple_self_signed(vec!["custom.test".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    std::fs::write(&cert_path, custom.cert.pem()).unwrap();

    // The certificate file holds no private key.
    let err = tls::load_tls_config(&cert_path, &cert_path).unwrap_err();
    assert!(err.to_string().contains("no private key"));
}
