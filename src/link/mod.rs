//! Point-to-point links between devices.
//!
//! [`Link`] splices two devices directly; [`DelayedLink`] extends a device
//! with a geographic propagation delay applied to every packet in both
//! directions.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::packet::{device_channel, NetworkDevice, Packet};

/// A direct link moving packets between two devices.
///
/// Two pump tasks move traffic in both directions until either device or
/// the link itself is closed.
pub struct Link {
    eof: CancellationToken,
    close_once: Once,
}

impl Link {
    /// Splices `left` and `right` and starts moving packets.
    #[must_use]
    pub fn new(left: &dyn NetworkDevice, right: &dyn NetworkDevice) -> Arc<Self> {
        let link = Arc::new(Self {
            eof: CancellationToken::new(),
            close_once: Once::new(),
        });
        link.pump(left, right);
        link.pump(right, left);
        link
    }

    fn pump(&self, src: &dyn NetworkDevice, dst: &dyn NetworkDevice) {
        let Some(mut output) = src.take_output() else {
            tracing::warn!("link: device output already taken, not pumping");
            return;
        };
        let link_eof = self.eof.clone();
        let src_eof = src.eof();
        let dst_eof = dst.eof();
        let dst_tx = dst.input();
        tokio::spawn(async move {
            loop {
                let pkt = tokio::select! {
                    () = link_eof.cancelled() => return,
                    () = src_eof.cancelled() => return,
                    pkt = output.recv() => {
                        let Some(pkt) = pkt else { return };
                        pkt
                    }
                };
                tracing::trace!(packet = %pkt, "INFLIGHT");
                tokio::select! {
                    () = link_eof.cancelled() => return,
                    () = dst_eof.cancelled() => return,
                    res = dst_tx.send(pkt) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Stops the pump tasks (idempotent).
    pub fn close(&self) {
        self.close_once.call_once(|| self.eof.cancel());
    }
}

/// Configuration for a [`DelayedLink`].
#[derive(Debug, Clone, Copy)]
pub struct DelayConfig {
    /// One-way propagation delay applied to every packet.
    pub delay: Duration,
}

/// A device front-end that adds propagation delay in both directions.
///
/// `DelayedLink::extend(dev, config)` returns a new device; packets
/// crossing it in either direction are delivered in FIFO order, each after
/// the configured delay. Attach the returned device in place of `dev`
/// (routes still come from `dev`'s addresses, which the delayed device
/// reports as its own).
pub struct DelayedLink {
    addrs: Vec<IpAddr>,
    eof: CancellationToken,
    input_tx: mpsc::Sender<Packet>,
    output_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
}

impl DelayedLink {
    /// Extends `dev` with a delay; returns the device to attach instead.
    #[must_use]
    pub fn extend(dev: &dyn NetworkDevice, config: &DelayConfig) -> Arc<Self> {
        let (input_tx, input_rx) = device_channel();
        let (output_tx, output_rx) = device_channel();
        let link = Arc::new(Self {
            addrs: dev.addresses(),
            eof: dev.eof(),
            input_tx,
            output_rx: Mutex::new(Some(output_rx)),
        });

        // Outward: dev output -> (delay) -> link output.
        if let Some(dev_output) = dev.take_output() {
            spawn_delay_forwarder(dev_output, output_tx, dev.eof(), config.delay);
        } else {
            tracing::warn!("delayed link: device output already taken");
        }
        // Inward: link input -> (delay) -> dev input.
        spawn_delay_forwarder(input_rx, dev.input(), dev.eof(), config.delay);

        link
    }
}

impl NetworkDevice for DelayedLink {
    fn addresses(&self) -> Vec<IpAddr> {
        self.addrs.clone()
    }

    fn eof(&self) -> CancellationToken {
        self.eof.clone()
    }

    fn input(&self) -> mpsc::Sender<Packet> {
        self.input_tx.clone()
    }

    fn take_output(&self) -> Option<mpsc::Receiver<Packet>> {
        self.output_rx.lock().take()
    }
}

/// Forwards packets with a per-packet propagation delay.
///
/// Arrivals are queued with their due time; the head of the queue is
/// delivered once due, preserving FIFO order.
fn spawn_delay_forwarder(
    mut src: mpsc::Receiver<Packet>,
    dst: mpsc::Sender<Packet>,
    eof: CancellationToken,
    delay: Duration,
) {
    let delay = delay.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut queue: VecDeque<(Instant, Packet)> = VecDeque::new();
        loop {
            if let Some(&(due, _)) = queue.front() {
                tokio::select! {
                    () = eof.cancelled() => return,
                    pkt = src.recv() => {
                        let Some(pkt) = pkt else { return };
                        queue.push_back((Instant::now() + delay, pkt));
                    }
                    () = tokio::time::sleep_until(due) => {
                        let (_, pkt) = queue.pop_front().expect("queue has a head");
                        tracing::trace!(packet = %pkt, "delayed link: delivering");
                        tokio::select! {
                            () = eof.cancelled() => return,
                            res = dst.send(pkt) => {
                                if res.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            } else {
                tokio::select! {
                    () = eof.cancelled() => return,
                    pkt = src.recv() => {
                        let Some(pkt) = pkt else { return };
                        queue.push_back((Instant::now() + delay, pkt));
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netstack::Stack;

    #[tokio::test]
    async fn test_link_moves_packets_between_stacks() {
        let left = Stack::new(vec!["10.0.0.1".parse().unwrap()]);
        let right = Stack::new(vec!["10.0.0.2".parse().unwrap()]);
        let link = Link::new(left.as_ref(), right.as_ref());

        let server = right.listen_packet("udp", "10.0.0.2:53").unwrap();
        let client = left
            .dial("udp", "10.0.0.2:53")
            .await
            .unwrap()
            .into_udp()
            .unwrap();

        client.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (count, src) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..count], b"ping");
        assert_eq!(src.ip(), "10.0.0.1".parse::<IpAddr>().unwrap());

        server.send_to(b"pong", src).await.unwrap();
        let count = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..count], b"pong");

        link.close();
        left.close();
        right.close();
    }

    #[tokio::test]
    async fn test_delayed_link_adds_latency() {
        let left = Stack::new(vec!["10.0.0.1".parse().unwrap()]);
        let right = Stack::new(vec!["10.0.0.2".parse().unwrap()]);
        let delayed = DelayedLink::extend(
            right.as_ref(),
            &DelayConfig {
                delay: Duration::from_millis(50),
            },
        );
        let link = Link::new(left.as_ref(), delayed.as_ref() as &dyn NetworkDevice);

        let server = right.listen_packet("udp", "10.0.0.2:53").unwrap();
        let client = left
            .dial("udp", "10.0.0.2:53")
            .await
            .unwrap()
            .into_udp()
            .unwrap();

        let start = Instant::now();
        client.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        server.recv(&mut buf).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        link.close();
        left.close();
        right.close();
    }
}
