//! Network stack.
//!
//! A [`Stack`] models one host: a set of local addresses, a table of open
//! ports keyed by [`PortAddr`], an ephemeral-port allocator, a demultiplexer
//! delivering incoming packets to ports, and per-port mux tasks merging
//! outgoing traffic into the stack's device output.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Once};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errno::{Errno, Result};
use crate::packet::{
    device_channel, IpProtocol, NetworkDevice, Packet, TcpFlags, DEFAULT_TTL,
};

use super::listener::TcpListener;
use super::port::{Port, PortAddr, PortStack};
use super::tcp::TcpConn;
use super::udp::UdpConn;

/// First ephemeral port per RFC 6335.
const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Either endpoint flavour returned by [`Stack::dial`].
#[derive(Debug)]
pub enum Connection {
    /// A connected TCP byte stream.
    Tcp(TcpConn),
    /// A connected UDP datagram endpoint.
    Udp(UdpConn),
}

impl Connection {
    /// The local address of the endpoint.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Self::Tcp(conn) => conn.local_addr(),
            Self::Udp(conn) => conn.local_addr(),
        }
    }

    /// The remote address of the endpoint.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(conn) => conn.remote_addr(),
            Self::Udp(conn) => conn.remote_addr(),
        }
    }

    /// Reads from the endpoint (byte stream or single datagram).
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Tcp(conn) => conn.read(buf).await,
            Self::Udp(conn) => conn.recv(buf).await,
        }
    }

    /// Writes to the endpoint (one packet per call).
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            Self::Tcp(conn) => conn.write(buf).await,
            Self::Udp(conn) => conn.send(buf).await,
        }
    }

    /// Sets both deadlines.
    pub fn set_deadline(&self, when: Option<Instant>) {
        match self {
            Self::Tcp(conn) => conn.set_deadline(when),
            Self::Udp(conn) => conn.set_deadline(when),
        }
    }

    /// Sets the read deadline.
    pub fn set_read_deadline(&self, when: Option<Instant>) {
        match self {
            Self::Tcp(conn) => conn.set_read_deadline(when),
            Self::Udp(conn) => conn.set_read_deadline(when),
        }
    }

    /// Sets the write deadline.
    pub fn set_write_deadline(&self, when: Option<Instant>) {
        match self {
            Self::Tcp(conn) => conn.set_write_deadline(when),
            Self::Udp(conn) => conn.set_write_deadline(when),
        }
    }

    /// Closes the endpoint.
    pub async fn close(&self) {
        match self {
            Self::Tcp(conn) => conn.close().await,
            Self::Udp(conn) => conn.close(),
        }
    }

    /// Unwraps the TCP flavour.
    ///
    /// # Errors
    ///
    /// Returns [`Errno::Inval`] for UDP connections.
    pub fn into_tcp(self) -> Result<TcpConn> {
        match self {
            Self::Tcp(conn) => Ok(conn),
            Self::Udp(conn) => {
                conn.close();
                Err(Errno::Inval)
            }
        }
    }

    /// Unwraps the UDP flavour.
    ///
    /// # Errors
    ///
    /// Returns [`Errno::Inval`] for TCP connections.
    pub fn into_udp(self) -> Result<UdpConn> {
        match self {
            Self::Udp(conn) => Ok(conn),
            Self::Tcp(_) => Err(Errno::Inval),
        }
    }
}

struct PortTable {
    next_port: HashMap<IpProtocol, u16>,
    ports: HashMap<PortAddr, Arc<Port>>,
}

/// An in-process, per-host network stack.
///
/// Create with [`Stack::new`]; a demultiplexer task runs until the stack is
/// closed. The stack is also a [`NetworkDevice`], so it can be attached to
/// a router or spliced to another device through a link.
pub struct Stack {
    addrs: Vec<IpAddr>,
    eof: CancellationToken,
    close_once: Once,
    input_tx: mpsc::Sender<Packet>,
    output_tx: mpsc::Sender<Packet>,
    output_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    table: RwLock<PortTable>,
    resolvers: RwLock<Vec<SocketAddr>>,
}

impl Stack {
    /// Creates a stack owning the given addresses and starts its
    /// demultiplexer. Call [`Stack::close`] to stop all muxing tasks.
    #[must_use]
    pub fn new(addrs: Vec<IpAddr>) -> Arc<Self> {
        let (input_tx, input_rx) = device_channel();
        let (output_tx, output_rx) = device_channel();
        let stack = Arc::new(Self {
            addrs,
            eof: CancellationToken::new(),
            close_once: Once::new(),
            input_tx,
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
            table: RwLock::new(PortTable {
                next_port: HashMap::from([
                    (IpProtocol::Tcp, FIRST_EPHEMERAL_PORT),
                    (IpProtocol::Udp, FIRST_EPHEMERAL_PORT),
                ]),
                ports: HashMap::new(),
            }),
            resolvers: RwLock::new(Vec::new()),
        });
        tokio::spawn(Arc::clone(&stack).demux_loop(input_rx));
        stack
    }

    /// The addresses owned by this stack.
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.addrs.clone()
    }

    /// Configures the DNS resolver endpoints used when dialing by name.
    pub fn set_resolvers(&self, addrs: Vec<SocketAddr>) {
        *self.resolvers.write() = addrs;
    }

    /// The configured DNS resolver endpoints.
    #[must_use]
    pub fn resolvers(&self) -> Vec<SocketAddr> {
        self.resolvers.read().clone()
    }

    /// Token cancelled when the stack closes.
    #[must_use]
    pub fn eof(&self) -> CancellationToken {
        self.eof.clone()
    }

    /// Closes the stack: stops muxing and closes every open port.
    pub fn close(&self) {
        self.close_once.call_once(|| {
            self.eof.cancel();
            let ports: Vec<Arc<Port>> = self.table.read().ports.values().cloned().collect();
            for port in ports {
                port.close();
            }
        });
    }

    /// Creates a listening TCP socket.
    ///
    /// An unspecified IP binds to all local addresses; a specified IP must
    /// be local. Port zero allocates an ephemeral port.
    ///
    /// # Errors
    ///
    /// [`Errno::ProtoNoSupport`] unless `network` is `"tcp"`;
    /// [`Errno::Inval`], [`Errno::AddrNotAvail`], [`Errno::AddrInUse`] per
    /// standard bind semantics.
    pub fn listen(self: &Arc<Self>, network: &str, address: &str) -> Result<TcpListener> {
        if network != "tcp" {
            return Err(Errno::ProtoNoSupport);
        }
        let port = self.bind_port(IpProtocol::Tcp, address)?;
        Ok(TcpListener::new(Arc::clone(self), port))
    }

    /// Creates a listening UDP socket.
    ///
    /// # Errors
    ///
    /// [`Errno::ProtoNoSupport`] unless `network` is `"udp"`; otherwise as
    /// for [`Stack::listen`].
    pub fn listen_packet(self: &Arc<Self>, network: &str, address: &str) -> Result<UdpConn> {
        if network != "udp" {
            return Err(Errno::ProtoNoSupport);
        }
        let port = self.bind_port(IpProtocol::Udp, address)?;
        Ok(UdpConn::new(port))
    }

    /// Dials `address` (an `ip:port` endpoint) over `network`.
    ///
    /// For TCP this also runs the three-way handshake, bounded by the
    /// optional deadline. Hostname dialing lives in
    /// [`Stack::dial`](crate::netstack::Stack::dial).
    pub(crate) async fn dial_addr(
        self: &Arc<Self>,
        network: &str,
        raddr: SocketAddr,
        deadline: Option<Instant>,
    ) -> Result<Connection> {
        match network {
            "tcp" => {
                let port = self.connect_port(IpProtocol::Tcp, raddr)?;
                let conn = TcpConn::new(port);
                if let Err(err) = conn.connect(deadline).await {
                    conn.close().await;
                    return Err(err);
                }
                Ok(Connection::Tcp(conn))
            }
            "udp" => {
                let port = self.connect_port(IpProtocol::Udp, raddr)?;
                Ok(Connection::Udp(UdpConn::new(port)))
            }
            _ => Err(Errno::ProtoNoSupport),
        }
    }

    /// Creates the fully-specified child connection for a listener.
    pub(crate) fn new_tcp_conn(
        self: &Arc<Self>,
        laddr: SocketAddr,
        raddr: SocketAddr,
    ) -> Result<TcpConn> {
        let mut table = self.table.write();
        let port = self.new_port_locked(&mut table, IpProtocol::Tcp, laddr, Some(raddr))?;
        Ok(TcpConn::new(port))
    }

    /// Binds a passive port, allocating an ephemeral port when needed.
    fn bind_port(self: &Arc<Self>, protocol: IpProtocol, address: &str) -> Result<Arc<Port>> {
        let mut table = self.table.write();

        let mut laddr: SocketAddr = address.parse().map_err(|_| Errno::Inval)?;
        if !laddr.ip().is_unspecified() && !self.is_local_addr(laddr.ip()) {
            return Err(Errno::AddrNotAvail);
        }
        if laddr.port() == 0 {
            let port = Self::next_ephemeral_locked(&mut table, protocol)?;
            laddr.set_port(port);
        }

        self.new_port_locked(&mut table, protocol, laddr, None)
    }

    /// Opens a connected port toward `raddr`.
    fn connect_port(self: &Arc<Self>, protocol: IpProtocol, raddr: SocketAddr) -> Result<Arc<Port>> {
        let mut table = self.table.write();

        if raddr.ip().is_unspecified() || raddr.port() == 0 {
            return Err(Errno::HostUnreach);
        }

        let source = self.select_source(raddr.ip()).ok_or(Errno::AddrNotAvail)?;

        let lport = Self::next_ephemeral_locked(&mut table, protocol)?;
        let laddr = SocketAddr::new(source, lport);
        self.new_port_locked(&mut table, protocol, laddr, Some(raddr))
    }

    fn next_ephemeral_locked(table: &mut PortTable, protocol: IpProtocol) -> Result<u16> {
        let counter = table
            .next_port
            .get_mut(&protocol)
            .expect("counter for every protocol");
        if *counter >= u16::MAX {
            return Err(Errno::AddrInUse);
        }
        let port = *counter;
        *counter += 1;
        Ok(port)
    }

    fn new_port_locked(
        self: &Arc<Self>,
        table: &mut PortTable,
        protocol: IpProtocol,
        laddr: SocketAddr,
        raddr: Option<SocketAddr>,
    ) -> Result<Arc<Port>> {
        let addr = PortAddr {
            local: laddr,
            protocol,
            remote: raddr,
        };
        if table.ports.contains_key(&addr) {
            return Err(Errno::AddrInUse);
        }

        let weak = Arc::downgrade(&(Arc::clone(self) as Arc<dyn PortStack>));
        let (port, output_rx) = Port::new(weak, addr);
        let port = Arc::new(port);
        tracing::debug!(port = %addr, "OPEN");
        table.ports.insert(addr, Arc::clone(&port));
        self.spawn_port_mux(&port, output_rx);
        Ok(port)
    }

    /// Forwards a port's outgoing packets into the stack output until the
    /// port or the stack closes.
    fn spawn_port_mux(&self, port: &Arc<Port>, mut output_rx: mpsc::Receiver<Packet>) {
        let port_eof = port.eof();
        let stack_eof = self.eof.clone();
        let output_tx = self.output_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = port_eof.cancelled() => return,
                    () = stack_eof.cancelled() => return,
                    pkt = output_rx.recv() => {
                        let Some(pkt) = pkt else { return };
                        tokio::select! {
                            () = port_eof.cancelled() => return,
                            () = stack_eof.cancelled() => return,
                            res = output_tx.send(pkt) => {
                                if res.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    async fn demux_loop(self: Arc<Self>, mut input_rx: mpsc::Receiver<Packet>) {
        loop {
            tokio::select! {
                () = self.eof.cancelled() => return,
                pkt = input_rx.recv() => {
                    let Some(pkt) = pkt else { return };
                    if let Err(err) = self.demux(pkt).await {
                        tracing::trace!(error = %err, class = err.token(), "demux: packet dropped");
                    }
                }
            }
        }
    }

    /// Delivers one incoming packet to the matching port.
    async fn demux(&self, pkt: Packet) -> Result<()> {
        if pkt.ttl == 0 {
            return Err(Errno::HostUnreach);
        }
        if !self.is_local_addr(pkt.dst_addr) {
            return Err(Errno::HostUnreach);
        }

        let Some(port) = self.find_port(&pkt) else {
            if pkt.protocol == IpProtocol::Tcp && pkt.flags == TcpFlags::SYN {
                self.reset_nonblocking(&pkt);
            }
            return Err(Errno::ConnRefused);
        };

        let sender = port.sender();
        let port_eof = port.eof();
        tokio::select! {
            () = port_eof.cancelled() => Err(Errno::Closed),
            () = self.eof.cancelled() => Err(Errno::NetDown),
            res = sender.send(pkt) => res.map_err(|_| Errno::Closed),
        }
    }

    /// Looks up the destination port for a packet.
    ///
    /// The cascade stops at the first hit:
    ///
    /// 1. exact five-tuple;
    /// 2. three-tuple (wildcard remote, i.e. listening sockets);
    /// 3. five-tuple with an unspecified local IP;
    /// 4. three-tuple with an unspecified local IP.
    fn find_port(&self, pkt: &Packet) -> Option<Arc<Port>> {
        let table = self.table.read();
        let local = SocketAddr::new(pkt.dst_addr, pkt.dst_port);
        let remote = SocketAddr::new(pkt.src_addr, pkt.src_port);

        let exact = PortAddr {
            local,
            protocol: pkt.protocol,
            remote: Some(remote),
        };
        if let Some(port) = table.ports.get(&exact) {
            return Some(Arc::clone(port));
        }

        let listening = PortAddr {
            remote: None,
            ..exact
        };
        if let Some(port) = table.ports.get(&listening) {
            return Some(Arc::clone(port));
        }

        for unspec in [
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        ] {
            let wildcard = SocketAddr::new(unspec, pkt.dst_port);
            let five = PortAddr {
                local: wildcard,
                protocol: pkt.protocol,
                remote: Some(remote),
            };
            if let Some(port) = table.ports.get(&five) {
                return Some(Arc::clone(port));
            }
            let three = PortAddr {
                remote: None,
                ..five
            };
            if let Some(port) = table.ports.get(&three) {
                return Some(Arc::clone(port));
            }
        }

        None
    }

    /// Answers a SYN for a closed port with RST, without blocking.
    ///
    /// The send goes into the stack's buffered output; if the buffer is
    /// full the RST is dropped.
    fn reset_nonblocking(&self, pkt: &Packet) {
        let rst = Packet {
            src_addr: pkt.dst_addr,
            dst_addr: pkt.src_addr,
            protocol: IpProtocol::Tcp,
            src_port: pkt.dst_port,
            dst_port: pkt.src_port,
            flags: TcpFlags::RST,
            ttl: DEFAULT_TTL,
            payload: Bytes::new(),
        };
        if self.output_tx.try_send(rst).is_err() {
            tracing::debug!("RST dropped: output buffer full");
        }
    }

    fn is_local_addr(&self, addr: IpAddr) -> bool {
        self.addrs.contains(&addr)
    }

    /// Prefers a local address in the destination's family, falling back
    /// to the first local address.
    fn select_source(&self, dst: IpAddr) -> Option<IpAddr> {
        self.addrs
            .iter()
            .find(|addr| addr.is_ipv4() == dst.is_ipv4())
            .or_else(|| self.addrs.first())
            .copied()
    }

    #[cfg(test)]
    pub(crate) fn set_next_ephemeral_port(&self, protocol: IpProtocol, value: u16) {
        self.table.write().next_port.insert(protocol, value);
    }

    #[cfg(test)]
    pub(crate) fn open_port_count(&self) -> usize {
        self.table.read().ports.len()
    }
}

impl PortStack for Stack {
    fn close_port(&self, addr: &PortAddr) {
        self.table.write().ports.remove(addr);
    }

    fn source_addr(&self, dst: IpAddr) -> Option<IpAddr> {
        self.select_source(dst)
    }
}

impl NetworkDevice for Stack {
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

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack").field("addrs", &self.addrs).finish()
    }
}
