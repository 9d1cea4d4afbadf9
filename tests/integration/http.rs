//! End-to-end HTTP and HTTPS scenarios.

use http::StatusCode;
use netsim::scenario::Scenario;
use netsim::StackConfig;

use super::init_tracing;

#[tokio::test]
async fn test_http_get_success() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_example_com_stack();
    scenario.attach(server.as_ref());

    let config = StackConfig::new().with_address("130.192.91.211".parse().unwrap());
    let client = scenario.must_new_stack(&config);
    scenario.attach(client.as_ref());

    let http = scenario.http_client(&client);
    let response = http.get("http://93.184.216.34/").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_ref(), b"Example Web Server.\n");

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_https_get_with_simulated_pki() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    // The server stack registers dns.google in the DNS database and gets
    // a certificate from the scenario PKI.
    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());

    // The client resolves dns.google through the configured resolvers and
    // validates the TLS chain against the scenario root CAs.
    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    let http = scenario.http_client(&client);
    let response = http.get("https://dns.google/").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_ref(), b"Google Public DNS server.\n");

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_https_hostname_mismatch_fails_validation() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    // Point an unrelated name at the server: its certificate does not
    // cover it, so verification must reject the handshake.
    scenario
        .dns_database()
        .add_addresses(&["fake.invalid"], &["8.8.8.8".parse().unwrap()]);

    let http = scenario.http_client(&client);
    let err = http.get("https://fake.invalid/").await.map(|_| ()).unwrap_err();
    assert!(
        matches!(err, netsim::scenario::HttpError::Io(_)),
        "expected a TLS validation failure, got: {err}"
    );

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_https_get_by_ip_literal_validates_ip_san() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    // 8.8.8.8 is among the certificate's IP subject alternative names,
    // so fetching by IP literal validates too.
    let http = scenario.http_client(&client);
    let response = http.get("https://8.8.8.8/").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_ref(), b"Google Public DNS server.\n");

    scenario.close().await.unwrap();
}
