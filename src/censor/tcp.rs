//! RST-based TCP connection interruption.

use bytes::Bytes;
use std::net::SocketAddr;

use crate::packet::{contains_subslice, Filter, IpProtocol, Packet, Target, TcpFlags, DEFAULT_TTL};

/// Injects RST segments for matching TCP packets.
///
/// With a pattern configured, packets with an empty payload (the
/// handshake) always pass, so connections establish before being reset on
/// protocol-specific content such as the TLS SNI. With an endpoint
/// configured, only traffic towards that endpoint is considered.
pub struct TcpResetter {
    target: Option<SocketAddr>,
    pattern: Option<Vec<u8>>,
}

impl TcpResetter {
    /// Creates a resetter.
    ///
    /// `target == None` matches every TCP connection; `pattern == None`
    /// skips payload matching.
    #[must_use]
    pub fn new(target: Option<SocketAddr>, pattern: Option<Vec<u8>>) -> Self {
        Self { target, pattern }
    }
}

impl Filter for TcpResetter {
    fn filter(&self, pkt: &Packet) -> (Target, Vec<Packet>) {
        if pkt.protocol != IpProtocol::Tcp {
            return (Target::Accept, Vec::new());
        }

        if let Some(target) = self.target {
            if pkt.dst_addr != target.ip() || pkt.dst_port != target.port() {
                return (Target::Accept, Vec::new());
            }
        }

        // Empty payloads (e.g. SYN) pass so the handshake can complete
        // before the reset.
        if let Some(pattern) = &self.pattern {
            if pkt.payload.is_empty() || !contains_subslice(&pkt.payload, pattern) {
                return (Target::Accept, Vec::new());
            }
        }

        let rst = Packet {
            src_addr: pkt.dst_addr,
            dst_addr: pkt.src_addr,
            protocol: IpProtocol::Tcp,
            src_port: pkt.dst_port,
            dst_port: pkt.src_port,
            flags: TcpFlags::RST,
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        };
        (Target::Accept, vec![rst])
    }
}
