//! Socket-level error conditions.
//!
//! The simulator surfaces the same closed set of error conditions a real
//! BSD-sockets stack would: address errors, connectivity errors, lifecycle
//! errors, and timeouts. [`Errno`] is deliberately small and `Copy` so it
//! can flow through channels and be recorded once and returned many times
//! (e.g. by idempotent `close`).

use std::io;

use thiserror::Error;

/// Error condition reported by ports, endpoints, and stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Errno {
    /// Ephemeral port space exhausted or port already bound.
    #[error("address already in use")]
    AddrInUse,

    /// Bind to an address that is not local to the stack.
    #[error("cannot assign requested address")]
    AddrNotAvail,

    /// Unexpected flags during the handshake.
    #[error("software caused connection abort")]
    ConnAborted,

    /// The peer answered a SYN with RST (or no port matched).
    #[error("connection refused")]
    ConnRefused,

    /// The peer sent RST on an established connection.
    #[error("connection reset by peer")]
    ConnReset,

    /// No route to the destination, or the destination is unspecified.
    #[error("no route to host")]
    HostUnreach,

    /// Malformed address or argument.
    #[error("invalid argument")]
    Inval,

    /// The stack is shut down.
    #[error("network is down")]
    NetDown,

    /// No buffer space available.
    #[error("no buffer space available")]
    NoBufs,

    /// Packet send without a known destination.
    #[error("transport endpoint is not connected")]
    NotConn,

    /// Network token other than `tcp` or `udp`.
    #[error("protocol not supported")]
    ProtoNoSupport,

    /// A deadline fired before the operation completed.
    #[error("operation timed out")]
    TimedOut,

    /// Operation on a closed port or endpoint.
    #[error("use of closed network connection")]
    Closed,
}

impl Errno {
    /// Short classification token for structured diagnostics.
    ///
    /// Tokens follow Unix-like naming; diagnostic sinks log them next to
    /// the original error message.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::AddrInUse => "EADDRINUSE",
            Self::AddrNotAvail => "EADDRNOTAVAIL",
            Self::ConnAborted => "ECONNABORTED",
            Self::ConnRefused => "ECONNREFUSED",
            Self::ConnReset => "ECONNRESET",
            Self::HostUnreach => "EHOSTUNREACH",
            Self::Inval => "EINVAL",
            Self::NetDown => "ENETDOWN",
            Self::NoBufs => "ENOBUFS",
            Self::NotConn => "ENOTCONN",
            Self::ProtoNoSupport => "EPROTONOSUPPORT",
            Self::TimedOut => "ETIMEDOUT",
            Self::Closed => "EINTR",
        }
    }

    /// The closest [`io::ErrorKind`] for this condition.
    #[must_use]
    pub const fn kind(self) -> io::ErrorKind {
        match self {
            Self::AddrInUse => io::ErrorKind::AddrInUse,
            Self::AddrNotAvail => io::ErrorKind::AddrNotAvailable,
            Self::ConnAborted => io::ErrorKind::ConnectionAborted,
            Self::ConnRefused => io::ErrorKind::ConnectionRefused,
            Self::ConnReset => io::ErrorKind::ConnectionReset,
            Self::HostUnreach | Self::NetDown | Self::NoBufs => io::ErrorKind::Other,
            Self::Inval | Self::ProtoNoSupport => io::ErrorKind::InvalidInput,
            Self::NotConn => io::ErrorKind::NotConnected,
            Self::TimedOut => io::ErrorKind::TimedOut,
            Self::Closed => io::ErrorKind::BrokenPipe,
        }
    }
}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> Self {
        io::Error::new(errno.kind(), errno)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_display() {
        assert_eq!(Errno::ConnRefused.to_string(), "connection refused");
        assert_eq!(
            Errno::Closed.to_string(),
            "use of closed network connection"
        );
    }

    #[test]
    fn test_errno_tokens() {
        assert_eq!(Errno::TimedOut.token(), "ETIMEDOUT");
        assert_eq!(Errno::Closed.token(), "EINTR");
        assert_eq!(Errno::ProtoNoSupport.token(), "EPROTONOSUPPORT");
    }

    #[test]
    fn test_errno_io_conversion() {
        let err: io::Error = Errno::TimedOut.into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err: io::Error = Errno::ConnReset.into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(err.to_string().contains("connection reset"));
    }
}
