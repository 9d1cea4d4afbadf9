//! TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::errno::Result;
use crate::packet::TcpFlags;

use super::port::Port;
use super::stack::Stack;
use super::tcp::TcpConn;

/// A TCP listener over a passive [`Port`].
///
/// The listener owns a passive port; each incoming SYN makes the stack
/// synthesise a fully-specified child port whose connection answers the
/// handshake.
pub struct TcpListener {
    port: Arc<Port>,
    stack: Arc<Stack>,
}

impl TcpListener {
    pub(crate) fn new(stack: Arc<Stack>, port: Arc<Port>) -> Self {
        Self { port, stack }
    }

    /// Waits for the next incoming connection.
    ///
    /// Non-SYN packets reaching the passive port are discarded. A child
    /// port that cannot be created (address in use) or whose SYN|ACK
    /// cannot be sent does not abort the loop.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Errno::Closed`] once the listener or its stack is
    /// closed, or [`crate::Errno::TimedOut`] if a read deadline was set.
    pub async fn accept(&self) -> Result<TcpConn> {
        loop {
            let pkt = self.port.read_packet().await?;
            if pkt.flags != TcpFlags::SYN {
                continue;
            }
            let laddr = SocketAddr::new(pkt.dst_addr, pkt.dst_port);
            let raddr = SocketAddr::new(pkt.src_addr, pkt.src_port);
            let Ok(conn) = self.stack.new_tcp_conn(laddr, raddr) else {
                continue;
            };
            if let Err(err) = conn.accept().await {
                tracing::debug!(local = %laddr, remote = %raddr, error = %err,
                    "accept handshake failed");
                conn.close().await;
                continue;
            }
            return Ok(conn);
        }
    }

    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.port.local_addr()
    }

    /// Closes the listener (idempotent).
    pub fn close(&self) {
        self.port.close();
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("local", &self.local_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use crate::errno::Errno;
    use crate::packet::{IpProtocol, NetworkDevice, Packet, DEFAULT_TTL};

    use super::super::stack::Stack;
    use super::*;

    fn syn_from(src: &str) -> Packet {
        let src: SocketAddr = src.parse().unwrap();
        Packet {
            src_addr: src.ip(),
            dst_addr: "10.0.0.1".parse().unwrap(),
            protocol: IpProtocol::Tcp,
            src_port: src.port(),
            dst_port: 80,
            flags: TcpFlags::SYN,
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_accept_synthesises_child_connection() {
        let stack = Stack::new(vec!["10.0.0.1".parse().unwrap()]);
        let listener = stack.listen("tcp", "10.0.0.1:80").unwrap();

        stack.input().send(syn_from("10.0.0.9:4242")).await.unwrap();

        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.local_addr(), "10.0.0.1:80".parse().unwrap());
        assert_eq!(conn.remote_addr(), Some("10.0.0.9:4242".parse().unwrap()));
        stack.close();
    }

    #[tokio::test]
    async fn test_accept_ignores_non_syn_packets() {
        let stack = Stack::new(vec!["10.0.0.1".parse().unwrap()]);
        let listener = stack.listen("tcp", "10.0.0.1:80").unwrap();

        let mut stray = syn_from("10.0.0.9:4242");
        stray.flags = TcpFlags::SYN | TcpFlags::ACK;
        stack.input().send(stray).await.unwrap();
        stack.input().send(syn_from("10.0.0.9:5353")).await.unwrap();

        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.remote_addr(), Some("10.0.0.9:5353".parse().unwrap()));
        stack.close();
    }

    #[tokio::test]
    async fn test_accept_returns_closed_after_close() {
        let stack = Stack::new(vec!["10.0.0.1".parse().unwrap()]);
        let listener = stack.listen("tcp", "10.0.0.1:80").unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        stack.close();
        assert_eq!(accept_task.await.unwrap().unwrap_err(), Errno::Closed);
    }
}
