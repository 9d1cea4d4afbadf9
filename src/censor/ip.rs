//! Connection blackholing with residual censorship.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::packet::{contains_subslice, Filter, IpProtocol, Packet, Target};

/// The five-tuple identifying a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FiveTuple {
    protocol: IpProtocol,
    src_addr: IpAddr,
    src_port: u16,
    dst_addr: IpAddr,
    dst_port: u16,
}

impl FiveTuple {
    fn of(pkt: &Packet) -> Self {
        Self {
            protocol: pkt.protocol,
            src_addr: pkt.src_addr,
            src_port: pkt.src_port,
            dst_addr: pkt.dst_addr,
            dst_port: pkt.dst_port,
        }
    }
}

/// Drops matching traffic and keeps dropping the matched five-tuple.
///
/// Once a packet matches by endpoint and/or payload pattern, its
/// five-tuple is recorded with a deadline; until the deadline every packet
/// of that connection is dropped, modeling residual censorship.
pub struct Blackholer {
    target: Option<SocketAddr>,
    pattern: Option<Vec<u8>>,
    duration: Duration,
    blocked: Mutex<HashMap<FiveTuple, Instant>>,
}

impl Blackholer {
    /// Creates a blackholer.
    ///
    /// `duration` controls how long a matched five-tuple stays blocked;
    /// `target == None` matches every connection; `pattern == None` skips
    /// payload matching.
    #[must_use]
    pub fn new(duration: Duration, target: Option<SocketAddr>, pattern: Option<Vec<u8>>) -> Self {
        Self {
            target,
            pattern,
            duration,
            blocked: Mutex::new(HashMap::new()),
        }
    }
}

impl Filter for Blackholer {
    fn filter(&self, pkt: &Packet) -> (Target, Vec<Packet>) {
        let tuple = FiveTuple::of(pkt);
        let now = Instant::now();

        {
            let mut blocked = self.blocked.lock();
            match blocked.get(&tuple) {
                Some(&deadline) if now < deadline => return (Target::Drop, Vec::new()),
                Some(_) => {
                    blocked.remove(&tuple);
                }
                None => {}
            }
        }

        if let Some(target) = self.target {
            if pkt.dst_addr != target.ip() || pkt.dst_port != target.port() {
                return (Target::Accept, Vec::new());
            }
        }
        if let Some(pattern) = &self.pattern {
            if pkt.payload.is_empty() || !contains_subslice(&pkt.payload, pattern) {
                return (Target::Accept, Vec::new());
            }
        }

        self.blocked.lock().insert(tuple, now + self.duration);
        (Target::Drop, Vec::new())
    }
}
