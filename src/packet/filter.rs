//! The filter hook consumed by the router.

use super::Packet;

/// Verdict returned by a [`Filter`] for the packet under examination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Continue the chain and eventually route the original packet.
    Accept,
    /// Stop the chain; the original packet is not routed.
    Drop,
}

/// A hook in the router's per-packet pipeline.
///
/// A filter examines each packet crossing the router and returns a verdict
/// plus any packets to inject. Injected packets are routed immediately and
/// *without* re-entering the filter chain, which prevents injection loops.
/// Filters run in insertion order; the first `Drop` wins, but injected
/// packets from earlier filters are routed regardless.
pub trait Filter: Send + Sync {
    /// Examine `pkt` and decide its fate.
    fn filter(&self, pkt: &Packet) -> (Target, Vec<Packet>);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropAll;

    impl Filter for DropAll {
        fn filter(&self, _pkt: &Packet) -> (Target, Vec<Packet>) {
            (Target::Drop, Vec::new())
        }
    }

    #[test]
    fn test_filter_object_safety() {
        let filter: Box<dyn Filter> = Box::new(DropAll);
        let pkt = crate::packet::Packet {
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "10.0.0.2".parse().unwrap(),
            protocol: crate::packet::IpProtocol::Udp,
            src_port: 1,
            dst_port: 2,
            flags: crate::packet::TcpFlags::empty(),
            ttl: 64,
            payload: bytes::Bytes::new(),
        };
        let (target, injected) = filter.filter(&pkt);
        assert_eq!(target, Target::Drop);
        assert!(injected.is_empty());
    }
}
