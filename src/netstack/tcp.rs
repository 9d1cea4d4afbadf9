//! TCP connection endpoint.
//!
//! [`TcpConn`] wraps a connected [`Port`] with a minimal TCP state machine:
//! a simplified three-way handshake, a byte-stream read buffer, and
//! FIN/RST handling. It is just enough TCP to exercise application code;
//! there is no windowing, retransmission, or congestion control.
//!
//! The endpoint offers two faces over the same connection:
//!
//! - an async method API (`connect`, `read`, `write`, `close`) mirroring
//!   standard socket semantics, including per-connection deadlines;
//! - [`AsyncRead`]/[`AsyncWrite`] adapters so TLS and HTTP stacks can layer
//!   on top the same way they would over a real socket.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::errno::{Errno, Result};
use crate::packet::TcpFlags;

use super::port::Port;

/// Deadline applied while a passive open sends its SYN|ACK.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// A boxed future that is both `Send` and `Sync`, so that holding it in a
/// field does not make the containing struct non-`Sync`.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + Sync + 'a>>;

/// A TCP connection over a simulated [`Port`].
pub struct TcpConn {
    inner: Arc<TcpInner>,
    read_fut: Option<BoxFuture<'static, Result<Bytes>>>,
    write_fut: Option<BoxFuture<'static, Result<usize>>>,
    shutdown_fut: Option<BoxFuture<'static, Result<()>>>,
    // Overflow from a chunk larger than the caller's read buffer.
    pending: BytesMut,
}

struct TcpInner {
    port: Arc<Port>,
    // Records the first handshake outcome; later connect/accept calls
    // observe the same result.
    init: OnceCell<std::result::Result<(), Errno>>,
    rbuf: parking_lot::Mutex<BytesMut>,
}

impl TcpConn {
    pub(crate) fn new(port: Arc<Port>) -> Self {
        Self {
            inner: Arc::new(TcpInner {
                port,
                init: OnceCell::new(),
                rbuf: parking_lot::Mutex::new(BytesMut::new()),
            }),
            read_fut: None,
            write_fut: None,
            shutdown_fut: None,
            pending: BytesMut::new(),
        }
    }

    /// Performs the client side of the three-way handshake.
    ///
    /// Runs at most once: repeated calls return the recorded outcome. The
    /// optional deadline bounds the whole handshake.
    ///
    /// # Errors
    ///
    /// - [`Errno::ConnRefused`] if the peer answers with RST;
    /// - [`Errno::ConnAborted`] on any other unexpected flags;
    /// - [`Errno::TimedOut`] / [`Errno::Closed`] from the underlying port.
    pub async fn connect(&self, deadline: Option<Instant>) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        *self
            .inner
            .init
            .get_or_init(|| async move { inner.handshake_connect(deadline).await })
            .await
    }

    /// Performs the server side of the handshake (responds SYN|ACK).
    ///
    /// Runs at most once, bounded by an internal one-second deadline.
    pub(crate) async fn accept(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        *self
            .inner
            .init
            .get_or_init(|| async move { inner.handshake_accept().await })
            .await
    }

    /// Reads bytes from the connection.
    ///
    /// Returns `Ok(0)` on graceful close (peer FIN) and
    /// [`Errno::ConnReset`] when the peer sent RST.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let chunk = self.inner.read_some(buf.len()).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Writes bytes as a single packet.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner
            .port
            .write_packet(buf, TcpFlags::empty(), None)
            .await?;
        Ok(buf.len())
    }

    /// Closes the connection: a best-effort FIN, then the underlying port.
    pub async fn close(&self) {
        self.inner.shutdown().await;
    }

    /// The local address of this connection.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.port.local_addr()
    }

    /// The remote address of this connection.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.port.remote_addr()
    }

    /// Sets both deadlines on the underlying port.
    pub fn set_deadline(&self, when: Option<Instant>) {
        self.inner.port.set_deadline(when);
    }

    /// Sets the read deadline on the underlying port.
    pub fn set_read_deadline(&self, when: Option<Instant>) {
        self.inner.port.set_read_deadline(when);
    }

    /// Sets the write deadline on the underlying port.
    pub fn set_write_deadline(&self, when: Option<Instant>) {
        self.inner.port.set_write_deadline(when);
    }
}

impl TcpInner {
    async fn handshake_connect(&self, deadline: Option<Instant>) -> Result<()> {
        if deadline.is_some() {
            self.port.set_deadline(deadline);
        }
        let res = self.handshake_connect_exchange().await;
        if deadline.is_some() {
            self.port.set_deadline(None);
        }
        res
    }

    async fn handshake_connect_exchange(&self) -> Result<()> {
        self.port.write_packet(&[], TcpFlags::SYN, None).await?;
        let pkt = self.port.read_packet().await?;
        if pkt.flags == TcpFlags::RST {
            return Err(Errno::ConnRefused);
        }
        if pkt.flags != (TcpFlags::SYN | TcpFlags::ACK) {
            return Err(Errno::ConnAborted);
        }
        Ok(())
    }

    async fn handshake_accept(&self) -> Result<()> {
        self.port.set_deadline(Some(Instant::now() + ACCEPT_TIMEOUT));
        let res = self
            .port
            .write_packet(&[], TcpFlags::SYN | TcpFlags::ACK, None)
            .await;
        self.port.set_deadline(None);
        res
    }

    /// Returns up to `max` buffered bytes, reading the next packet when
    /// the buffer is empty. An empty chunk means EOF (peer FIN).
    async fn read_some(&self, max: usize) -> Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        {
            let mut rbuf = self.rbuf.lock();
            if !rbuf.is_empty() {
                let count = rbuf.len().min(max);
                return Ok(rbuf.split_to(count).freeze());
            }
        }
        loop {
            let pkt = self.port.read_packet().await?;
            if pkt.flags.contains(TcpFlags::FIN) {
                return Ok(Bytes::new());
            }
            if pkt.flags.contains(TcpFlags::RST) {
                return Err(Errno::ConnReset);
            }
            if pkt.payload.is_empty() {
                continue;
            }
            let mut rbuf = self.rbuf.lock();
            rbuf.extend_from_slice(&pkt.payload);
            let count = rbuf.len().min(max);
            return Ok(rbuf.split_to(count).freeze());
        }
    }

    async fn shutdown(&self) {
        // The FIN is best-effort: the port may already be closed.
        let _ = self.port.write_packet(&[], TcpFlags::FIN, None).await;
        self.port.close();
    }
}

impl Drop for TcpInner {
    fn drop(&mut self) {
        // Keep the port table tidy when a connection is dropped without an
        // explicit close. No FIN here: close() is the graceful path.
        self.port.close();
    }
}

impl AsyncRead for TcpConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            let count = this.pending.len().min(buf.remaining());
            buf.put_slice(&this.pending.split_to(count));
            return Poll::Ready(Ok(()));
        }

        if this.read_fut.is_none() {
            let inner = Arc::clone(&this.inner);
            let max = buf.remaining();
            this.read_fut = Some(Box::pin(async move { inner.read_some(max).await }));
        }
        let fut = this.read_fut.as_mut().expect("read future installed");
        match fut.as_mut().poll(cx) {
            Poll::Ready(res) => {
                this.read_fut = None;
                match res {
                    Ok(chunk) => {
                        let count = chunk.len().min(buf.remaining());
                        buf.put_slice(&chunk[..count]);
                        if count < chunk.len() {
                            this.pending.extend_from_slice(&chunk[count..]);
                        }
                        Poll::Ready(Ok(()))
                    }
                    Err(errno) => Poll::Ready(Err(errno.into())),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for TcpConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write_fut.is_none() {
            let inner = Arc::clone(&this.inner);
            let data = Bytes::copy_from_slice(buf);
            this.write_fut = Some(Box::pin(async move {
                inner
                    .port
                    .write_packet(&data, TcpFlags::empty(), None)
                    .await
                    .map(|()| data.len())
            }));
        }
        let fut = this.write_fut.as_mut().expect("write future installed");
        match fut.as_mut().poll(cx) {
            Poll::Ready(res) => {
                this.write_fut = None;
                Poll::Ready(res.map_err(Into::into))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Packets are queued directly on the port; nothing to flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.shutdown_fut.is_none() {
            let inner = Arc::clone(&this.inner);
            this.shutdown_fut = Some(Box::pin(async move {
                inner.shutdown().await;
                Ok(())
            }));
        }
        let fut = this.shutdown_fut.as_mut().expect("shutdown future installed");
        match fut.as_mut().poll(cx) {
            Poll::Ready(res) => {
                this.shutdown_fut = None;
                Poll::Ready(res.map_err(Into::into))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConn")
            .field("local", &self.local_addr())
            .field("remote", &self.remote_addr())
            .finish()
    }
}
