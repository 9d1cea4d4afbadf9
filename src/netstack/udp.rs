//! UDP connection endpoint.
//!
//! A thin datagram adapter over a [`Port`]. In connected mode (created by
//! `dial`) reads filter on the configured remote; in unconnected mode
//! (created by `listen_packet`) reads accept any source and report it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::Instant;

use crate::errno::Result;
use crate::packet::Packet;

use super::port::Port;

/// A UDP endpoint over a simulated [`Port`].
#[derive(Debug, Clone)]
pub struct UdpConn {
    port: Arc<Port>,
}

impl UdpConn {
    pub(crate) fn new(port: Arc<Port>) -> Self {
        Self { port }
    }

    /// Receives a datagram, returning the bytes copied and the source.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.port.read_from(buf).await
    }

    /// Receives a datagram from the connected remote.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (count, _) = self.port.read_from(buf).await?;
        Ok(count)
    }

    /// Receives the next raw packet.
    pub async fn recv_packet(&self) -> Result<Packet> {
        self.port.read_packet().await
    }

    /// Sends a datagram to the given address.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.port.write_to(buf, addr).await
    }

    /// Sends a datagram to the connected remote.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.port.write(buf).await
    }

    /// The local address of this endpoint.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.port.local_addr()
    }

    /// The remote address, when connected.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.port.remote_addr()
    }

    /// Sets both deadlines.
    pub fn set_deadline(&self, when: Option<Instant>) {
        self.port.set_deadline(when);
    }

    /// Sets the read deadline.
    pub fn set_read_deadline(&self, when: Option<Instant>) {
        self.port.set_read_deadline(when);
    }

    /// Sets the write deadline.
    pub fn set_write_deadline(&self, when: Option<Instant>) {
        self.port.set_write_deadline(when);
    }

    /// Closes the endpoint (idempotent).
    pub fn close(&self) {
        self.port.close();
    }
}
