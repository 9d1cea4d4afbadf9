//! DNS servers bound to a simulated [`Stack`].
//!
//! Three transports share one [`Handler`]: DNS-over-UDP, DNS-over-TCP
//! (plaintext, RFC 1035 two-byte length framing), and DNS-over-TLS (the
//! same framing inside TLS). DNS-over-HTTPS is served through the HTTP
//! layer; see the scenario module.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::netstack::{TcpListener, UdpConn};

use super::Handler;

/// Maximum DNS message size accepted on any transport.
const MAX_MESSAGE_SIZE: usize = 65535;

/// A DNS-over-UDP server on a bound datagram socket.
pub struct DnsOverUdpServer {
    conn: UdpConn,
    handler: Arc<dyn Handler>,
}

impl DnsOverUdpServer {
    /// Creates the server; call [`DnsOverUdpServer::run`] to serve.
    #[must_use]
    pub fn new(conn: UdpConn, handler: Arc<dyn Handler>) -> Self {
        Self { conn, handler }
    }

    /// Serves queries until the socket closes.
    pub async fn run(self) {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            let (count, peer) = match self.conn.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    debug!(error = %err, "dns-over-udp: server loop done");
                    return;
                }
            };
            let Some(response) = self.handler.handle(&buf[..count]) else {
                continue;
            };
            if let Err(err) = self.conn.send_to(&response, peer).await {
                debug!(peer = %peer, error = %err, "dns-over-udp: send failed");
            }
        }
    }
}

/// A DNS-over-TCP server, optionally wrapped in TLS (DNS-over-TLS).
pub struct DnsOverTcpServer {
    listener: Arc<TcpListener>,
    handler: Arc<dyn Handler>,
    tls: Option<TlsAcceptor>,
}

impl DnsOverTcpServer {
    /// Creates a plaintext DNS-over-TCP server.
    #[must_use]
    pub fn new(listener: Arc<TcpListener>, handler: Arc<dyn Handler>) -> Self {
        Self {
            listener,
            handler,
            tls: None,
        }
    }

    /// Creates a DNS-over-TLS server.
    #[must_use]
    pub fn new_with_tls(
        listener: Arc<TcpListener>,
        handler: Arc<dyn Handler>,
        acceptor: TlsAcceptor,
    ) -> Self {
        Self {
            listener,
            handler,
            tls: Some(acceptor),
        }
    }

    /// Accepts and serves connections until the listener closes.
    pub async fn run(self) {
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    debug!(error = %err, "dns-over-tcp: accept loop done");
                    return;
                }
            };
            let handler = Arc::clone(&self.handler);
            let tls = self.tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(conn).await {
                        Ok(stream) => serve_stream(stream, handler).await,
                        Err(err) => {
                            debug!(error = %err, "dns-over-tls: handshake failed");
                        }
                    },
                    None => serve_stream(conn, handler).await,
                }
            });
        }
    }
}

/// Serves length-prefixed DNS messages on one byte stream.
async fn serve_stream<S>(mut stream: S, handler: Arc<dyn Handler>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut length = [0u8; 2];
        if stream.read_exact(&mut length).await.is_err() {
            return;
        }
        let length = usize::from(u16::from_be_bytes(length));
        let mut message = vec![0u8; length];
        if stream.read_exact(&mut message).await.is_err() {
            return;
        }

        let Some(response) = handler.handle(&message) else {
            continue;
        };
        let Ok(response_len) = u16::try_from(response.len()) else {
            continue;
        };
        if stream.write_all(&response_len.to_be_bytes()).await.is_err()
            || stream.write_all(&response).await.is_err()
        {
            return;
        }
    }
}
