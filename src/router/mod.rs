//! Central router.
//!
//! The router forwards packets between attached devices using a static
//! routing table, running every packet through a pluggable filter chain
//! that models middleboxes and censors.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::packet::{Filter, NetworkDevice, Packet, Target};

/// Routing failures. These are telemetry-only: the packet is silently
/// dropped and the failure surfaces at higher layers as a timeout or a
/// reset, never as an application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
enum RouteError {
    #[error("TTL exceeded in transit")]
    TtlExceeded,
    #[error("no route to host")]
    NoRoute,
    #[error("buffer full")]
    BufferFull,
}

/// A static-table router with a filter chain.
///
/// Attaching a device spawns a reader for that device; routes map each
/// device address to the device's input queue. Route mutation is intended
/// for scenario setup: the table tolerates concurrent reads during routing
/// but inserting routes while traffic flows gives unspecified delivery for
/// in-flight packets. When several devices claim the same address, the
/// last insertion wins.
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    routes: RwLock<HashMap<IpAddr, mpsc::Sender<Packet>>>,
    filters: RwLock<Vec<Arc<dyn Filter>>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: RwLock::new(HashMap::new()),
                filters: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Attaches a device, spawning a reader that routes its output until
    /// the device closes.
    pub fn attach(&self, dev: &dyn NetworkDevice) {
        let Some(mut output) = dev.take_output() else {
            tracing::warn!("attach: device output already taken, not spawning reader");
            return;
        };
        let eof = dev.eof();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = eof.cancelled() => return,
                    pkt = output.recv() => {
                        let Some(pkt) = pkt else { return };
                        inner.handle(pkt);
                    }
                }
            }
        });
    }

    /// Inserts a route for every address of the given device.
    pub fn add_route(&self, dev: &dyn NetworkDevice) {
        let mut routes = self.inner.routes.write();
        for addr in dev.addresses() {
            routes.insert(addr, dev.input());
        }
    }

    /// Appends a filter to the chain. Filters run in insertion order;
    /// removal is not supported.
    pub fn add_filter(&self, filter: Arc<dyn Filter>) {
        self.inner.filters.write().push(filter);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterInner {
    /// Runs one packet through the filter chain, then routes it.
    ///
    /// The chain is snapshot-copied under the read lock so filters run
    /// without holding it. Injected packets are routed immediately and do
    /// not re-enter the chain; a `Drop` verdict stops the chain and the
    /// original packet is not routed.
    fn handle(&self, pkt: Packet) {
        let filters: Vec<Arc<dyn Filter>> = self.filters.read().clone();
        for filter in &filters {
            let (target, injected) = filter.filter(&pkt);
            for spoofed in injected {
                if let Err(err) = self.route(spoofed) {
                    tracing::trace!(error = %err, "router: injected packet dropped");
                }
            }
            if target == Target::Drop {
                tracing::trace!(packet = %pkt, "router: packet dropped by filter");
                return;
            }
        }
        if let Err(err) = self.route(pkt) {
            tracing::trace!(error = %err, "router: packet dropped");
        }
    }

    fn route(&self, mut pkt: Packet) -> Result<(), RouteError> {
        if pkt.ttl == 0 {
            return Err(RouteError::TtlExceeded);
        }
        pkt.ttl -= 1;

        let routes = self.routes.read();
        let next_hop = routes.get(&pkt.dst_addr).ok_or(RouteError::NoRoute)?;
        next_hop.try_send(pkt).map_err(|_| RouteError::BufferFull)
    }
}
