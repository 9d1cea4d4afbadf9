//! Transparent destination NAT.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use parking_lot::Mutex;

use crate::packet::{Filter, IpProtocol, Packet, Target};

/// Session key: the client side of a rewritten connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    protocol: IpProtocol,
    client_addr: IpAddr,
    client_port: u16,
}

/// Rewrites a destination endpoint transparently.
///
/// On the forward path, packets from the (optional) source towards the
/// original destination are re-targeted to the replacement; on the return
/// path the replacement is rewritten back, so both endpoints observe the
/// peer's original addresses. The filter realises rewriting as
/// drop-plus-inject: injected packets bypass the filter chain, which also
/// rules out rewrite loops.
pub struct Dnatter {
    src_addr: Option<IpAddr>,
    orig_dst: SocketAddr,
    replacement: SocketAddr,
    // Tracks rewritten connections so replies can be un-rewritten.
    sessions: Mutex<HashMap<SessionKey, SocketAddr>>,
}

impl Dnatter {
    /// Creates a DNAT rule redirecting `orig_dst` to `replacement`,
    /// optionally only for traffic originated by `src_addr`.
    #[must_use]
    pub fn new(src_addr: Option<IpAddr>, orig_dst: SocketAddr, replacement: SocketAddr) -> Self {
        Self {
            src_addr,
            orig_dst,
            replacement,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn rewrite_forward(&self, pkt: &Packet) -> Packet {
        let key = SessionKey {
            protocol: pkt.protocol,
            client_addr: pkt.src_addr,
            client_port: pkt.src_port,
        };
        self.sessions.lock().insert(key, self.orig_dst);

        let mut rewritten = pkt.clone();
        rewritten.dst_addr = self.replacement.ip();
        rewritten.dst_port = self.replacement.port();
        rewritten
    }

    fn rewrite_return(&self, pkt: &Packet) -> Option<Packet> {
        let key = SessionKey {
            protocol: pkt.protocol,
            client_addr: pkt.dst_addr,
            client_port: pkt.dst_port,
        };
        let orig_dst = *self.sessions.lock().get(&key)?;

        let mut rewritten = pkt.clone();
        rewritten.src_addr = orig_dst.ip();
        rewritten.src_port = orig_dst.port();
        Some(rewritten)
    }
}

impl Filter for Dnatter {
    fn filter(&self, pkt: &Packet) -> (Target, Vec<Packet>) {
        // Forward path: client -> original destination.
        let src_matches = self.src_addr.is_none() || self.src_addr == Some(pkt.src_addr);
        if src_matches
            && pkt.dst_addr == self.orig_dst.ip()
            && pkt.dst_port == self.orig_dst.port()
        {
            return (Target::Drop, vec![self.rewrite_forward(pkt)]);
        }

        // Return path: replacement -> client.
        if pkt.src_addr == self.replacement.ip() && pkt.src_port == self.replacement.port() {
            if let Some(rewritten) = self.rewrite_return(pkt) {
                return (Target::Drop, vec![rewritten]);
            }
        }

        (Target::Accept, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::packet::{TcpFlags, DEFAULT_TTL};

    use super::*;

    fn dnatter() -> Dnatter {
        Dnatter::new(
            Some("193.206.158.22".parse().unwrap()),
            "93.184.216.34:80".parse().unwrap(),
            "10.10.34.35:80".parse().unwrap(),
        )
    }

    fn forward_packet() -> Packet {
        Packet {
            src_addr: "193.206.158.22".parse().unwrap(),
            dst_addr: "93.184.216.34".parse().unwrap(),
            protocol: IpProtocol::Tcp,
            src_port: 50000,
            dst_port: 80,
            flags: TcpFlags::SYN,
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        }
    }

    #[test]
    fn test_forward_and_return_are_symmetric() {
        let nat = dnatter();

        let (target, injected) = nat.filter(&forward_packet());
        assert_eq!(target, Target::Drop);
        assert_eq!(injected.len(), 1);
        let rewritten = &injected[0];
        assert_eq!(rewritten.dst_addr, "10.10.34.35".parse::<IpAddr>().unwrap());
        assert_eq!(rewritten.dst_port, 80);
        // The source is untouched: the blockpage server replies directly.
        assert_eq!(rewritten.src_addr, "193.206.158.22".parse::<IpAddr>().unwrap());

        let reply = Packet {
            src_addr: "10.10.34.35".parse().unwrap(),
            dst_addr: "193.206.158.22".parse().unwrap(),
            protocol: IpProtocol::Tcp,
            src_port: 80,
            dst_port: 50000,
            flags: TcpFlags::SYN | TcpFlags::ACK,
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        };
        let (target, injected) = nat.filter(&reply);
        assert_eq!(target, Target::Drop);
        assert_eq!(injected.len(), 1);
        let unrewritten = &injected[0];
        // The client observes the original destination as the peer.
        assert_eq!(unrewritten.src_addr, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert_eq!(unrewritten.src_port, 80);
    }

    #[test]
    fn test_unrelated_source_passes() {
        let nat = dnatter();
        let mut pkt = forward_packet();
        pkt.src_addr = "10.99.99.99".parse().unwrap();
        let (target, injected) = nat.filter(&pkt);
        assert_eq!(target, Target::Accept);
        assert!(injected.is_empty());
    }

    #[test]
    fn test_reply_without_session_passes() {
        let nat = dnatter();
        let reply = Packet {
            src_addr: "10.10.34.35".parse().unwrap(),
            dst_addr: "193.206.158.22".parse().unwrap(),
            protocol: IpProtocol::Tcp,
            src_port: 80,
            dst_port: 1,
            flags: TcpFlags::empty(),
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        };
        let (target, injected) = nat.filter(&reply);
        assert_eq!(target, Target::Accept);
        assert!(injected.is_empty());
    }
}
