//! Router-level end-to-end behaviours.

use netsim::scenario::Scenario;
use netsim::{Errno, Router, Stack};

use super::init_tracing;

#[tokio::test]
async fn test_udp_round_trip_over_router() {
    init_tracing();
    let server_stack = Stack::new(vec!["8.8.8.8".parse().unwrap()]);
    let client_stack = Stack::new(vec!["130.192.91.211".parse().unwrap()]);

    let router = Router::new();
    router.attach(server_stack.as_ref());
    router.attach(client_stack.as_ref());
    router.add_route(server_stack.as_ref());
    router.add_route(client_stack.as_ref());

    // Echo server.
    let echo = server_stack.listen_packet("udp", "8.8.8.8:5353").unwrap();
    {
        let echo = echo.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((count, peer)) = echo.recv_from(&mut buf).await {
                if echo.send_to(&buf[..count], peer).await.is_err() {
                    return;
                }
            }
        });
    }

    let conn = client_stack
        .dial("udp", "8.8.8.8:5353")
        .await
        .unwrap()
        .into_udp()
        .unwrap();
    conn.send(b"echo me").await.unwrap();
    let mut buf = [0u8; 2048];
    let count = conn.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..count], b"echo me");

    client_stack.close();
    server_stack.close();
}

#[tokio::test]
async fn test_tcp_connect_to_closed_port_is_refused() {
    init_tracing();
    let cache = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(cache.path()).unwrap();

    let server = scenario.must_new_google_dns_stack();
    scenario.attach(server.as_ref());
    let client = scenario.must_new_client_stack();
    scenario.attach(client.as_ref());

    // Nothing listens on 9999: the SYN gets answered with RST.
    let err = client.dial("tcp", "8.8.8.8:9999").await.unwrap_err();
    assert_eq!(err, Errno::ConnRefused);

    scenario.close().await.unwrap();
}

#[tokio::test]
async fn test_tcp_accept_and_echo_over_router() {
    init_tracing();
    let server_stack = Stack::new(vec!["8.8.8.8".parse().unwrap()]);
    let client_stack = Stack::new(vec!["130.192.91.211".parse().unwrap()]);

    let router = Router::new();
    router.attach(server_stack.as_ref());
    router.attach(client_stack.as_ref());
    router.add_route(server_stack.as_ref());
    router.add_route(client_stack.as_ref());

    let listener = server_stack.listen("tcp", "8.8.8.8:7777").unwrap();
    let server_task = tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 2048];
        let count = conn.read(&mut buf).await.unwrap();
        conn.write(&buf[..count]).await.unwrap();
        conn.close().await;
    });

    let conn = client_stack
        .dial("tcp", "8.8.8.8:7777")
        .await
        .unwrap()
        .into_tcp()
        .unwrap();
    conn.write(b"hello over tcp").await.unwrap();
    let mut buf = [0u8; 2048];
    let count = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..count], b"hello over tcp");

    // After the server's FIN, reads report EOF.
    let count = conn.read(&mut buf).await.unwrap();
    assert_eq!(count, 0);

    server_task.await.unwrap();
    client_stack.close();
    server_stack.close();
}
