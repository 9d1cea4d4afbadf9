//! Censorship techniques as router filters.
//!
//! Each type here implements [`crate::packet::Filter`] and models one
//! real-world censorship technique:
//!
//! - [`DnsPoisoner`] injects spoofed DNS answers while letting the
//!   legitimate query race through, so clients observe duplicate replies;
//! - [`TcpResetter`] tears down connections with RST segments, matching on
//!   endpoint and/or payload content (e.g. the TLS SNI), while letting
//!   handshakes complete;
//! - [`Blackholer`] silently drops traffic and remembers the matched
//!   five-tuple for a configurable window (residual censorship);
//! - [`Dnatter`] transparently rewrites destinations, e.g. to divert
//!   traffic towards a blockpage server.
//!
//! Filters compose: install several on the same router to model layered
//! censorship.

mod dns;
mod ip;
mod nat;
mod tcp;

pub use dns::DnsPoisoner;
pub use ip::Blackholer;
pub use nat::Dnatter;
pub use tcp::TcpResetter;
