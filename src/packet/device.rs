//! The network-device channel contract.

use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Packet, DEFAULT_BUFFER};

/// Anything that moves packets: stacks, link extenders, firewalls.
///
/// A device exposes its addresses, an EOF signal, a sender for delivering
/// packets *into* the device, and a one-time receiver for the packets the
/// device emits. Both channels are buffered with capacity
/// [`DEFAULT_BUFFER`] so upstream components can use non-blocking sends.
///
/// tokio mpsc receivers have a single consumer, so the output half is
/// *taken* by whoever attaches the device (a router reader or a link pump).
/// This encodes the rule that a device is attached at most once; a second
/// [`NetworkDevice::take_output`] returns `None`.
pub trait NetworkDevice: Send + Sync {
    /// The IP addresses owned by this device.
    ///
    /// Pure forwarding devices (e.g. delay links) may return an empty list.
    fn addresses(&self) -> Vec<IpAddr>;

    /// Token cancelled when the device shuts down.
    fn eof(&self) -> CancellationToken;

    /// Sender delivering packets into the device.
    fn input(&self) -> mpsc::Sender<Packet>;

    /// Hands over the device's output stream to its (single) consumer.
    fn take_output(&self) -> Option<mpsc::Receiver<Packet>>;
}

/// Creates a packet channel with the standard device buffer size.
#[must_use]
pub fn device_channel() -> (mpsc::Sender<Packet>, mpsc::Receiver<Packet>) {
    mpsc::channel(DEFAULT_BUFFER)
}
