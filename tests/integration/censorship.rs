//! End-to-end censorship scenarios.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use netsim::censor::{Blackholer, Dnatter, TcpResetter};
use netsim::scenario::{HttpError, Scenario};

use super::init_tracing;

#[tokio::test]
async fn test_sni_rst_injection() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());

    // Reset any TCP segment whose payload mentions the target SNI; the
    // handshake itself (empty payloads) completes normally.
    scenario
        .router()
        .add_filter(Arc::new(TcpResetter::new(None, Some(b"dns.google".to_vec()))));

    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    let http = scenario.http_client(&client);
    let err = http.get("https://dns.google/").await.map(|_| ()).unwrap_err();
    match err {
        HttpError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected a connection reset, got: {other}"),
    }

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_sni_blackholing_with_residual_censorship() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());

    scenario.router().add_filter(Arc::new(Blackholer::new(
        Duration::from_secs(300),
        None,
        Some(b"dns.google".to_vec()),
    )));

    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    let http = scenario.http_client(&client);
    let err = http
        .get_with_timeout("https://dns.google/", Duration::from_millis(200))
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, HttpError::Timeout), "got: {err}");

    // A second attempt within the residual window fails as well.
    let err = http
        .get_with_timeout("https://dns.google/", Duration::from_millis(200))
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, HttpError::Timeout), "got: {err}");

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_transparent_dnat_blockpage() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let blockpage = scenario.must_new_blockpage_stack();
    scenario.attach(blockpage.as_ref());
    let website = scenario.must_new_example_com_stack();
    scenario.attach(website.as_ref());

    // Divert the client's port-80 traffic for the website to the
    // blockpage server, transparently to both endpoints.
    scenario.router().add_filter(Arc::new(Dnatter::new(
        Some("193.206.158.22".parse().unwrap()),
        "93.184.216.34:80".parse().unwrap(),
        "10.10.34.35:80".parse().unwrap(),
    )));

    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    let http = scenario.http_client(&client);
    let response = http.get("http://93.184.216.34/").await.unwrap();
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(
        response.body.as_ref(),
        b"Access to this website has been blocked by network policy.\n"
    );

    scenario.close().await.unwrap();
}
