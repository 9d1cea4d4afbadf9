//! Hostname dialing through the stack's configured resolvers.
//!
//! IP literals short-circuit resolution; everything else is resolved by
//! querying the configured resolver endpoints over DNS-over-UDP (A first,
//! then AAAA), then dialing the returned addresses in order.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::time::Instant;

use crate::errno::{Errno, Result};

use super::stack::{Connection, Stack};
use super::udp::UdpConn;

/// Read deadline applied to each resolver round trip.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

impl Stack {
    /// Dials `address` (`host:port`; the host may be an IP literal or a
    /// domain name) over `network` (`tcp` or `udp`).
    ///
    /// # Errors
    ///
    /// Resolution with no configured resolvers or no usable answers yields
    /// [`Errno::HostUnreach`]; otherwise the usual dial errors apply.
    pub async fn dial(self: &Arc<Self>, network: &str, address: &str) -> Result<Connection> {
        self.dial_with_deadline(network, address, None).await
    }

    /// Like [`Stack::dial`], bounding the TCP handshake with a deadline.
    pub async fn dial_with_deadline(
        self: &Arc<Self>,
        network: &str,
        address: &str,
        deadline: Option<Instant>,
    ) -> Result<Connection> {
        if let Ok(raddr) = address.parse::<SocketAddr>() {
            return self.dial_addr(network, raddr, deadline).await;
        }

        let (host, port) = split_host_port(address)?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.dial_addr(network, SocketAddr::new(ip, port), deadline).await;
        }

        let addrs = self.lookup_host(host).await?;
        let mut last = Errno::HostUnreach;
        for ip in addrs {
            match self
                .dial_addr(network, SocketAddr::new(ip, port), deadline)
                .await
            {
                Ok(conn) => return Ok(conn),
                Err(err) => last = err,
            }
        }
        Err(last)
    }

    /// Resolves `host` using the configured resolvers.
    ///
    /// # Errors
    ///
    /// [`Errno::HostUnreach`] with no configured resolvers or when every
    /// resolver fails or answers empty.
    pub async fn lookup_host(self: &Arc<Self>, host: &str) -> Result<Vec<IpAddr>> {
        let resolvers = self.resolvers();
        if resolvers.is_empty() {
            tracing::debug!(domain = host, "lookup host: no configured resolvers");
            return Err(Errno::HostUnreach);
        }

        tracing::debug!(domain = host, "lookup host start");
        for resolver in resolvers {
            let mut addrs = Vec::new();
            for qtype in [RecordType::A, RecordType::AAAA] {
                match self.query_resolver(resolver, host, qtype).await {
                    Ok(answers) => addrs.extend(answers),
                    Err(err) => {
                        tracing::debug!(
                            domain = host,
                            resolver = %resolver,
                            error = %err,
                            "lookup host: query failed"
                        );
                    }
                }
            }
            if !addrs.is_empty() {
                tracing::debug!(domain = host, addrs = ?addrs, "lookup host done");
                return Ok(addrs);
            }
        }
        Err(Errno::HostUnreach)
    }

    async fn query_resolver(
        self: &Arc<Self>,
        resolver: SocketAddr,
        host: &str,
        qtype: RecordType,
    ) -> Result<Vec<IpAddr>> {
        let conn = self.dial_addr("udp", resolver, None).await?.into_udp()?;
        let result = query_exchange(&conn, host, qtype).await;
        conn.close();
        result
    }
}

/// One DNS round trip over an already-connected UDP endpoint.
async fn query_exchange(conn: &UdpConn, host: &str, qtype: RecordType) -> Result<Vec<IpAddr>> {
    let mut name = Name::from_utf8(host).map_err(|_| Errno::Inval)?;
    name.set_fqdn(true);

    let query_id: u16 = rand::random();
    let mut query = Message::new();
    query
        .set_id(query_id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, qtype));
    let raw = query.to_vec().map_err(|_| Errno::Inval)?;

    conn.send(&raw).await?;
    conn.set_read_deadline(Some(Instant::now() + RESOLVE_TIMEOUT));

    let mut buf = vec![0u8; 4096];
    let response = loop {
        let count = conn.recv(&mut buf).await?;
        let Ok(response) = Message::from_vec(&buf[..count]) else {
            continue;
        };
        if response.id() != query_id {
            continue;
        }
        break response;
    };

    Ok(response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect())
}

/// Splits `host:port`, tolerating bracketed IPv6 hosts.
fn split_host_port(address: &str) -> Result<(&str, u16)> {
    let (host, port) = address.rsplit_once(':').ok_or(Errno::Inval)?;
    let port: u16 = port.parse().map_err(|_| Errno::Inval)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(Errno::Inval);
    }
    Ok((host, port))
}
