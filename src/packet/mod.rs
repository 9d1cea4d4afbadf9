//! Packet value type and the contracts shared by everything that moves packets.
//!
//! A [`Packet`] is the unit of traffic in the simulator: an IP-level value
//! with transport ports, TCP flags, a TTL, and an owned payload. Components
//! exchange packets over buffered channels; the [`NetworkDevice`] trait is
//! the bi-directional channel contract and [`Filter`] is the hook the router
//! offers to middlebox implementations.

mod device;
mod filter;

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;

pub use device::{device_channel, NetworkDevice};
pub use filter::{Filter, Target};

/// Capacity of every packet channel in the simulator.
///
/// Buffering lets routers and stacks use non-blocking sends, and lets a
/// stack emit a RST for a closed port without deadlocking on itself.
pub const DEFAULT_BUFFER: usize = 128;

/// Default TTL assigned to new packets (Linux-like).
pub const DEFAULT_TTL: u8 = 64;

/// IP protocol number carried by a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    /// TCP (protocol number 6).
    Tcp,
    /// UDP (protocol number 17).
    Udp,
}

impl IpProtocol {
    /// The protocol number as it would appear in an IP header.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Set of TCP flags as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// The FIN flag.
    pub const FIN: Self = Self(1);
    /// The SYN flag.
    pub const SYN: Self = Self(2);
    /// The RST flag.
    pub const RST: Self = Self(4);
    /// The PSH flag.
    pub const PSH: Self = Self(8);
    /// The ACK flag.
    pub const ACK: Self = Self(16);

    /// The empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether all flags in `other` are set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for TcpFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, ch) in [
            (Self::FIN, 'F'),
            (Self::SYN, 'S'),
            (Self::RST, 'R'),
            (Self::PSH, 'P'),
            (Self::ACK, 'A'),
        ] {
            write!(f, "{}", if self.contains(flag) { ch } else { '.' })?;
        }
        Ok(())
    }
}

/// A network packet.
///
/// The payload is always owned by the packet: producers copy caller buffers
/// before sending, which keeps upper layers that recycle buffers correct.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Source IP address.
    pub src_addr: IpAddr,
    /// Destination IP address.
    pub dst_addr: IpAddr,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// TCP flags; empty for UDP.
    pub flags: TcpFlags,
    /// Remaining time to live.
    pub ttl: u8,
    /// Owned payload bytes.
    pub payload: Bytes,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            IpProtocol::Tcp => write!(
                f,
                "{} -> {} {} flags={} length={}",
                join_host_port(self.src_addr, self.src_port),
                join_host_port(self.dst_addr, self.dst_port),
                self.protocol,
                self.flags,
                self.payload.len(),
            ),
            IpProtocol::Udp => write!(
                f,
                "{} -> {} {} length={}",
                join_host_port(self.src_addr, self.src_port),
                join_host_port(self.dst_addr, self.dst_port),
                self.protocol,
                self.payload.len(),
            ),
        }
    }
}

/// Formats `addr:port`, bracketing IPv6 addresses.
fn join_host_port(addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Whether `haystack` contains `needle` as a contiguous subslice.
pub(crate) fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|win| win == needle)
}
