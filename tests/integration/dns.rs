//! End-to-end DNS scenarios.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use netsim::netstack::UdpConn;
use netsim::scenario::Scenario;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use super::init_tracing;

fn a_query(id: u16, name: &str) -> Vec<u8> {
    let mut query = Message::new();
    query
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    query.to_vec().unwrap()
}

fn a_answers(message: &Message) -> Vec<IpAddr> {
    message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            _ => None,
        })
        .collect()
}

async fn recv_response(conn: &UdpConn, id: u16) -> Message {
    let mut buf = vec![0u8; 4096];
    loop {
        let count = conn.recv(&mut buf).await.unwrap();
        let Ok(response) = Message::from_vec(&buf[..count]) else {
            continue;
        };
        if response.id() == id {
            return response;
        }
    }
}

#[tokio::test]
async fn test_dns_over_udp_single_answer() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client_stack = scenario.must_new_client_stack();
    scenario.attach(client_stack.as_ref());

    let conn = client_stack
        .dial("udp", "8.8.8.8:53")
        .await
        .unwrap()
        .into_udp()
        .unwrap();
    conn.send(&a_query(0x1111, "dns.google.")).await.unwrap();

    let response = recv_response(&conn, 0x1111).await;
    let addrs = a_answers(&response);
    assert_eq!(addrs, vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);

    conn.close();
    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_gfw_style_dns_poisoning_order() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());

    // The poisoner answers from its own database; the legitimate answer
    // still races through the network behind the spoofed one.
    let censor_db = netsim::dns::Database::new();
    censor_db.add_addresses(&["dns.google"], &["10.0.0.1".parse().unwrap()]);
    scenario
        .router()
        .add_filter(Arc::new(netsim::censor::DnsPoisoner::new(Arc::new(
            censor_db,
        ))));

    let client_stack = scenario.must_new_client_stack();
    scenario.attach(client_stack.as_ref());

    let conn = client_stack
        .dial("udp", "8.8.8.8:53")
        .await
        .unwrap()
        .into_udp()
        .unwrap();
    conn.send(&a_query(0x2222, "dns.google.")).await.unwrap();

    // Poisoned first, legitimate second.
    let first = recv_response(&conn, 0x2222).await;
    assert_eq!(a_answers(&first), vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
    let second = recv_response(&conn, 0x2222).await;
    assert_eq!(a_answers(&second), vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);

    conn.close();
    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_dns_over_tls_round_trip() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client_stack = scenario.must_new_client_stack();
    scenario.attach(client_stack.as_ref());

    let tcp = client_stack
        .dial("tcp", "8.8.8.8:853")
        .await
        .unwrap()
        .into_tcp()
        .unwrap();

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(scenario.root_cas())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from("dns.google").unwrap();
    let mut stream = connector.connect(server_name, tcp).await.unwrap();

    let query = a_query(0x3333, "dns.google.");
    let framed_len = u16::try_from(query.len()).unwrap();
    stream.write_all(&framed_len.to_be_bytes()).await.unwrap();
    stream.write_all(&query).await.unwrap();

    let mut length = [0u8; 2];
    stream.read_exact(&mut length).await.unwrap();
    let mut raw = vec![0u8; usize::from(u16::from_be_bytes(length))];
    stream.read_exact(&mut raw).await.unwrap();

    let response = Message::from_vec(&raw).unwrap();
    assert_eq!(response.id(), 0x3333);
    assert_eq!(a_answers(&response), vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_dns_over_https_round_trip() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client_stack = scenario.must_new_client_stack();
    scenario.attach(client_stack.as_ref());

    let tcp = client_stack
        .dial("tcp", "8.8.8.8:443")
        .await
        .unwrap()
        .into_tcp()
        .unwrap();
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(scenario.root_cas())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from("dns.google").unwrap();
    let stream = connector.connect(server_name, tcp).await.unwrap();

    let (mut sender, conn) =
        hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream))
            .await
            .unwrap();
    tokio::spawn(conn);

    let request = http::Request::post("/dns-query")
        .header(http::header::HOST, "dns.google")
        .header(http::header::CONTENT_TYPE, "application/dns-message")
        .body(http_body_util::Full::new(bytes::Bytes::from(a_query(
            0x4444,
            "dns.google.",
        ))))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    use http_body_util::BodyExt;
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let message = Message::from_vec(&body).unwrap();
    assert_eq!(message.id(), 0x4444);
    assert_eq!(a_answers(&message), vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);

    scenario.close().await.unwrap();
}
