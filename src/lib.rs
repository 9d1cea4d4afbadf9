//! netsim: an in-process network simulator for integration tests.
//!
//! This crate emulates multiple independent user-space IP stacks,
//! connects them through a central router, and lets tests drive realistic
//! TCP/UDP/TLS traffic entirely inside one process, including censorship
//! scenarios such as DNS poisoning, RST injection, blackholing, and
//! destination NAT.
//!
//! # Architecture
//!
//! ```text
//! application
//!     |
//! TcpConn / UdpConn            (socket semantics, deadlines)
//!     |
//! Port                         (five-tuple, deliver/send queues)
//!     |
//! Stack                        (port table, demux, ephemeral ports)
//!     |
//! Router                       (routing table + filter chain)
//!     |
//! Stack -> Port -> endpoint -> application
//! ```
//!
//! Everything that moves packets implements the [`packet::NetworkDevice`]
//! channel contract; routers and stacks use non-blocking sends into
//! buffered channels, dropping rather than deadlocking under pressure.
//!
//! # Quick start
//!
//! ```no_run
//! use netsim::scenario::Scenario;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // A scenario wires stacks through a central router and simulates
//! // DNS and PKI for the registered names.
//! let scenario = Scenario::new("testdata")?;
//! let server = scenario.must_new_example_com_stack();
//! scenario.attach(server.as_ref());
//! let client = scenario.must_new_client_stack();
//! scenario.attach(client.as_ref());
//!
//! let http = scenario.http_client(&client);
//! let response = http.get("http://93.184.216.34/").await?;
//! assert_eq!(response.body.as_ref(), b"Example Web Server.\n");
//!
//! scenario.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`packet`]: the packet value type and the device/filter contracts
//! - [`deadline`]: refreshable deadline primitive
//! - [`netstack`]: ports, TCP/UDP endpoints, listeners, and the stack
//! - [`router`]: the central router with its filter chain
//! - [`link`]: direct and delayed point-to-point links
//! - [`dns`]: the DNS record database and the DNS servers
//! - [`censor`]: censorship filters (poisoning, RST, blackholing, DNAT)
//! - [`pki`]: the simulated certification authority
//! - [`scenario`]: the composition root assembling everything

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod censor;
pub mod deadline;
pub mod dns;
pub mod errno;
pub mod link;
pub mod netstack;
pub mod packet;
pub mod pki;
pub mod router;
pub mod scenario;

// Re-export the types most tests touch.
pub use deadline::Deadline;
pub use errno::{Errno, Result};
pub use link::{DelayConfig, DelayedLink, Link};
pub use netstack::{Connection, Port, PortAddr, Stack, TcpConn, TcpListener, UdpConn};
pub use packet::{Filter, IpProtocol, NetworkDevice, Packet, Target, TcpFlags, DEFAULT_BUFFER};
pub use router::Router;
pub use scenario::{Scenario, StackConfig};
