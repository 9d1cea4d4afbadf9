//! TCP/UDP port implementation.
//!
//! A [`Port`] is the in-process analogue of an open socket: it owns the
//! five-tuple, a delivery queue fed by the stack demultiplexer, a send
//! queue drained by the stack output muxer, and the read/write deadlines.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Once, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::deadline::Deadline;
use crate::errno::{Errno, Result};
use crate::packet::{device_channel, IpProtocol, Packet, TcpFlags, DEFAULT_TTL};

/// The [`Port`] identity: `(local, protocol, remote)`.
///
/// A `None` remote denotes a passive (listening) or unconnected endpoint.
/// This tuple is the primary key of the stack's port table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortAddr {
    /// Local address and port; always fully specified.
    pub local: SocketAddr,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Remote address and port; `None` for non-connected ports.
    pub remote: Option<SocketAddr>,
}

impl fmt::Display for PortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote {
            Some(remote) => write!(f, "{} -> {} {}", self.local, remote, self.protocol),
            None => write!(f, "{} -> *:* {}", self.local, self.protocol),
        }
    }
}

/// The stack as seen by a [`Port`].
///
/// The port holds a weak reference to this trait so it can deregister
/// itself on close without owning the stack (no reference cycle).
pub trait PortStack: Send + Sync {
    /// Removes the port with the given address from the port table.
    fn close_port(&self, addr: &PortAddr);

    /// Picks the source address for a packet sent towards `dst` from a
    /// port bound to an unspecified address (source-address selection).
    fn source_addr(&self, dst: std::net::IpAddr) -> Option<std::net::IpAddr>;
}

/// An open TCP/UDP port.
pub struct Port {
    addr: PortAddr,
    eof: CancellationToken,
    close_once: Once,
    input_tx: mpsc::Sender<Packet>,
    input_rx: tokio::sync::Mutex<mpsc::Receiver<Packet>>,
    output_tx: mpsc::Sender<Packet>,
    read_deadline: Deadline,
    write_deadline: Deadline,
    stack: Weak<dyn PortStack>,
}

impl Port {
    /// Creates a port and returns it together with the receiving half of
    /// its output queue, which the owning stack moves into a mux task.
    pub(crate) fn new(
        stack: Weak<dyn PortStack>,
        addr: PortAddr,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (input_tx, input_rx) = device_channel();
        let (output_tx, output_rx) = device_channel();
        let port = Self {
            addr,
            eof: CancellationToken::new(),
            close_once: Once::new(),
            input_tx,
            input_rx: tokio::sync::Mutex::new(input_rx),
            output_tx,
            read_deadline: Deadline::new(),
            write_deadline: Deadline::new(),
            stack,
        };
        (port, output_rx)
    }

    /// The port identity.
    pub(crate) fn addr(&self) -> &PortAddr {
        &self.addr
    }

    /// Sender used by the stack demultiplexer to deliver packets.
    pub(crate) fn sender(&self) -> mpsc::Sender<Packet> {
        self.input_tx.clone()
    }

    /// Token cancelled when the port closes.
    pub(crate) fn eof(&self) -> CancellationToken {
        self.eof.clone()
    }

    /// The local address of this port.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr.local
    }

    /// The remote address of this port, if connected.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.addr.remote
    }

    /// Sets both the read and the write deadline.
    pub fn set_deadline(&self, when: Option<Instant>) {
        self.read_deadline.set(when);
        self.write_deadline.set(when);
    }

    /// Sets the read deadline.
    pub fn set_read_deadline(&self, when: Option<Instant>) {
        self.read_deadline.set(when);
    }

    /// Sets the write deadline.
    pub fn set_write_deadline(&self, when: Option<Instant>) {
        self.write_deadline.set(when);
    }

    /// Receives the next packet from the remote endpoint.
    ///
    /// Packets whose source does not match the configured remote address
    /// are silently discarded, the way a kernel demux drops misdirected
    /// datagrams; with no configured remote, every packet is accepted.
    ///
    /// # Errors
    ///
    /// - [`Errno::Closed`] if the port closes before a packet arrives;
    /// - [`Errno::TimedOut`] if the read deadline fires.
    pub async fn read_packet(&self) -> Result<Packet> {
        let mut input = self.input_rx.lock().await;
        loop {
            let deadline = self.read_deadline.wait();
            tokio::select! {
                pkt = input.recv() => {
                    let Some(pkt) = pkt else {
                        return Err(Errno::Closed);
                    };
                    match self.addr.remote {
                        Some(remote) if pkt.src_addr != remote.ip() => continue,
                        _ => return Ok(pkt),
                    }
                }
                () = self.eof.cancelled() => return Err(Errno::Closed),
                () = deadline.cancelled() => return Err(Errno::TimedOut),
            }
        }
    }

    /// Builds and sends a packet to `raddr` with the given payload and flags.
    ///
    /// With `raddr` unset the configured remote is used. The payload is
    /// copied into the packet, so callers may recycle their buffers.
    ///
    /// # Errors
    ///
    /// - [`Errno::NotConn`] if neither `raddr` nor a configured remote exists;
    /// - [`Errno::Closed`] if the port closes before the packet is queued;
    /// - [`Errno::TimedOut`] if the write deadline fires.
    pub async fn write_packet(
        &self,
        payload: &[u8],
        flags: TcpFlags,
        raddr: Option<SocketAddr>,
    ) -> Result<()> {
        let raddr = raddr.or(self.addr.remote).ok_or(Errno::NotConn)?;
        // Wildcard-bound ports need a concrete source: ask the stack the
        // way a kernel performs source-address selection.
        let mut src_addr = self.addr.local.ip();
        if src_addr.is_unspecified() {
            if let Some(stack) = self.stack.upgrade() {
                if let Some(selected) = stack.source_addr(raddr.ip()) {
                    src_addr = selected;
                }
            }
        }
        let pkt = Packet {
            src_addr,
            dst_addr: raddr.ip(),
            protocol: self.addr.protocol,
            src_port: self.addr.local.port(),
            dst_port: raddr.port(),
            flags,
            ttl: DEFAULT_TTL,
            payload: Bytes::copy_from_slice(payload),
        };
        let deadline = self.write_deadline.wait();
        tokio::select! {
            res = self.output_tx.send(pkt) => res.map_err(|_| Errno::Closed),
            () = self.eof.cancelled() => Err(Errno::Closed),
            () = deadline.cancelled() => Err(Errno::TimedOut),
        }
    }

    /// Receives a datagram, returning the bytes copied and the source.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let pkt = self.read_packet().await?;
        let count = pkt.payload.len().min(buf.len());
        buf[..count].copy_from_slice(&pkt.payload[..count]);
        Ok((count, SocketAddr::new(pkt.src_addr, pkt.src_port)))
    }

    /// Sends a datagram to the given address.
    pub async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.write_packet(buf, TcpFlags::empty(), Some(addr)).await?;
        Ok(buf.len())
    }

    /// Sends a datagram to the configured remote.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.write_packet(buf, TcpFlags::empty(), None).await?;
        Ok(buf.len())
    }

    /// Closes the port, terminating any pending I/O.
    ///
    /// Closing is idempotent: the port deregisters from its stack, the EOF
    /// signal fires, and both deadlines are cleared exactly once.
    pub fn close(&self) {
        self.close_once.call_once(|| {
            tracing::debug!(port = %self.addr, "CLOSE");
            if let Some(stack) = self.stack.upgrade() {
                stack.close_port(&self.addr);
            }
            self.eof.cancel();
            self.read_deadline.set(None);
            self.write_deadline.set(None);
        });
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("addr", &self.addr).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct NullStack;

    impl PortStack for NullStack {
        fn close_port(&self, _addr: &PortAddr) {}

        fn source_addr(&self, _dst: std::net::IpAddr) -> Option<std::net::IpAddr> {
            None
        }
    }

    fn test_port(remote: Option<SocketAddr>) -> (Arc<Port>, mpsc::Receiver<Packet>) {
        let stack: Arc<dyn PortStack> = Arc::new(NullStack);
        let addr = PortAddr {
            local: "10.0.0.1:1234".parse().unwrap(),
            protocol: IpProtocol::Udp,
            remote,
        };
        // The stack is dropped on return; close then skips deregistration,
        // which NullStack would ignore anyway.
        let (port, output_rx) = Port::new(Arc::downgrade(&stack), addr);
        (Arc::new(port), output_rx)
    }

    fn packet_from(src: &str) -> Packet {
        let src: SocketAddr = src.parse().unwrap();
        Packet {
            src_addr: src.ip(),
            dst_addr: "10.0.0.1".parse().unwrap(),
            protocol: IpProtocol::Udp,
            src_port: src.port(),
            dst_port: 1234,
            flags: TcpFlags::empty(),
            ttl: DEFAULT_TTL,
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[tokio::test]
    async fn test_read_packet_accepts_any_source_when_unconnected() {
        let (port, _output) = test_port(None);
        port.sender().send(packet_from("10.0.0.9:99")).await.unwrap();
        let pkt = port.read_packet().await.unwrap();
        assert_eq!(&pkt.payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_packet_discards_mismatched_source() {
        let (port, _output) = test_port(Some("10.0.0.2:53".parse().unwrap()));
        port.sender().send(packet_from("10.0.0.9:99")).await.unwrap();
        port.sender().send(packet_from("10.0.0.2:53")).await.unwrap();
        let pkt = port.read_packet().await.unwrap();
        assert_eq!(pkt.src_addr, "10.0.0.2".parse::<std::net::IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_read_packet_deadline() {
        let (port, _output) = test_port(None);
        port.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));
        assert_eq!(port.read_packet().await.unwrap_err(), Errno::TimedOut);
    }

    #[tokio::test]
    async fn test_read_packet_unblocked_by_close() {
        let (port, _output) = test_port(None);
        let reader = {
            let port = Arc::clone(&port);
            tokio::spawn(async move { port.read_packet().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        port.close();
        assert_eq!(reader.await.unwrap().unwrap_err(), Errno::Closed);
    }

    #[tokio::test]
    async fn test_write_packet_not_connected() {
        let (port, _output) = test_port(None);
        assert_eq!(
            port.write_packet(b"x", TcpFlags::empty(), None)
                .await
                .unwrap_err(),
            Errno::NotConn
        );
    }

    #[tokio::test]
    async fn test_write_packet_copies_payload_and_sets_ttl() {
        let (port, mut output) = test_port(Some("10.0.0.2:53".parse().unwrap()));
        let mut buf = *b"data";
        port.write_packet(&buf, TcpFlags::empty(), None).await.unwrap();
        buf[0] = b'X';
        let pkt = output.recv().await.unwrap();
        assert_eq!(&pkt.payload[..], b"data");
        assert_eq!(pkt.ttl, DEFAULT_TTL);
        assert_eq!(pkt.dst_port, 53);
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let (port, _output) = test_port(Some("10.0.0.2:53".parse().unwrap()));
        port.close();
        assert_eq!(
            port.write_packet(b"x", TcpFlags::empty(), None)
                .await
                .unwrap_err(),
            Errno::Closed
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (port, _output) = test_port(None);
        port.close();
        port.close();
        port.close();
        assert_eq!(port.read_packet().await.unwrap_err(), Errno::Closed);
    }

    #[test]
    fn test_port_addr_display() {
        let addr = PortAddr {
            local: "10.0.0.1:1234".parse().unwrap(),
            protocol: IpProtocol::Tcp,
            remote: None,
        };
        assert_eq!(addr.to_string(), "10.0.0.1:1234 -> *:* tcp");

        let addr = PortAddr {
            remote: Some("10.0.0.2:80".parse().unwrap()),
            ..addr
        };
        assert_eq!(addr.to_string(), "10.0.0.1:1234 -> 10.0.0.2:80 tcp");
    }
}
