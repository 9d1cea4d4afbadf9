//! Scenario: the composition root for simulations.
//!
//! A [`Scenario`] assembles stacks, the central router, the simulated PKI,
//! and the DNS database into a star topology: every stack connects only to
//! the router, which forwards packets between them (and runs the filter
//! chain, where censorship lives).

mod config;
mod http;
mod pool;
mod wellknown;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

pub use config::StackConfig;
pub use http::{
    DnsHttpHandler, HttpClient, HttpError, HttpHandler, HttpResponse, HttpServer, PathMux,
    TextHandler,
};
pub use pool::{ClosePool, Closer, PoolError};

use crate::dns::server::{DnsOverTcpServer, DnsOverUdpServer};
use crate::dns::{Database, Handler as DnsHandler};
use crate::errno::Errno;
use crate::netstack::Stack;
use crate::packet::NetworkDevice;
use crate::pki::{CertConfig, PkiError, SimPki};
use crate::router::Router;

/// Scenario construction and composition failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The stack configuration is invalid.
    #[error("invalid stack config: {0}")]
    InvalidConfig(String),

    /// A socket-level failure while setting up servers.
    #[error(transparent)]
    Errno(#[from] Errno),

    /// The simulated PKI failed.
    #[error(transparent)]
    Pki(#[from] PkiError),
}

/// A network-simulation scenario with a star topology.
pub struct Scenario {
    dns_db: Arc<Database>,
    pki: Arc<SimPki>,
    pool: ClosePool,
    router: Router,
}

impl Scenario {
    /// Creates a scenario; `cache_dir` caches simulated-PKI material.
    ///
    /// # Errors
    ///
    /// Fails when the PKI cannot be created (see [`PkiError`]).
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, ScenarioError> {
        Ok(Self {
            dns_db: Arc::new(Database::new()),
            pki: Arc::new(SimPki::new(cache_dir)?),
            pool: ClosePool::new(),
            router: Router::new(),
        })
    }

    /// The DNS handler serving this scenario's record database.
    #[must_use]
    pub fn dns_handler(&self) -> Arc<dyn DnsHandler> {
        Arc::clone(&self.dns_db) as Arc<dyn DnsHandler>
    }

    /// The scenario's DNS record database.
    #[must_use]
    pub fn dns_database(&self) -> Arc<Database> {
        Arc::clone(&self.dns_db)
    }

    /// The root certificate store clients should trust.
    #[must_use]
    pub fn root_cas(&self) -> Arc<rustls::RootCertStore> {
        self.pki.root_store()
    }

    /// The central router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Connects a device to the central router.
    ///
    /// The common case is attaching a [`Stack`], but any device works,
    /// e.g. a stack extended with a delay link.
    pub fn attach(&self, dev: &dyn NetworkDevice) {
        self.router.attach(dev);
    }

    /// An HTTP client dialing through `stack` and trusting the scenario
    /// root CAs.
    #[must_use]
    pub fn http_client(&self, stack: &Arc<Stack>) -> HttpClient {
        HttpClient::new(Arc::clone(stack), self.pki.client_config())
    }

    /// Creates a stack from the configuration; panics on error.
    ///
    /// Not safe for concurrent use with itself: scenario composition is a
    /// setup-phase activity.
    ///
    /// # Panics
    ///
    /// On any [`ScenarioError`].
    pub fn must_new_stack(&self, config: &StackConfig) -> Arc<Stack> {
        self.new_stack(config).expect("valid stack config")
    }

    /// Creates a stack from the configuration.
    ///
    /// This (1) builds the base stack and routes its addresses through the
    /// router, (2) configures client resolvers, (3) registers domain names
    /// in the DNS database, (4) issues a certificate when domain names are
    /// present, and (5) starts the configured servers. Call
    /// [`Scenario::attach`] to actually connect the stack to the router.
    ///
    /// # Errors
    ///
    /// Any [`ScenarioError`].
    pub fn new_stack(&self, config: &StackConfig) -> Result<Arc<Stack>, ScenarioError> {
        if config.addresses.is_empty() {
            return Err(ScenarioError::InvalidConfig(
                "at least one address is required".to_string(),
            ));
        }

        let stack = Stack::new(config.addresses.clone());
        self.pool.add(Arc::clone(&stack) as Arc<dyn Closer>);
        self.router.add_route(stack.as_ref());

        if !config.client_resolvers.is_empty() {
            let resolvers: Vec<SocketAddr> = config
                .client_resolvers
                .iter()
                .map(|&ip| SocketAddr::new(ip, 53))
                .collect();
            stack.set_resolvers(resolvers);
        }

        if !config.domain_names.is_empty() {
            self.dns_db
                .add_addresses(&config.domain_names, &config.addresses);
        }

        let tls_config = if config.domain_names.is_empty() {
            if config.wants_tls() {
                return Err(ScenarioError::InvalidConfig(
                    "TLS servers require at least one domain name".to_string(),
                ));
            }
            None
        } else {
            let cert_config = CertConfig {
                common_name: config.domain_names[0].clone(),
                dns_names: config.domain_names.clone(),
                ip_addrs: config.addresses.clone(),
            };
            Some(self.pki.server_config(&cert_config)?)
        };

        self.start_servers(&stack, config, tls_config.as_ref())?;
        Ok(stack)
    }

    fn start_servers(
        &self,
        stack: &Arc<Stack>,
        config: &StackConfig,
        tls_config: Option<&Arc<rustls::ServerConfig>>,
    ) -> Result<(), ScenarioError> {
        if let Some(handler) = &config.dns_over_udp_handler {
            let conn = stack.listen_packet("udp", "[::]:53")?;
            self.pool.add(Arc::new(conn.clone()) as Arc<dyn Closer>);
            debug!(addr = %conn.local_addr(), "starting DNS-over-UDP server");
            tokio::spawn(DnsOverUdpServer::new(conn, Arc::clone(handler)).run());
        }

        if let Some(handler) = &config.dns_over_tcp_handler {
            let listener = Arc::new(stack.listen("tcp", "[::]:53")?);
            self.pool.add(Arc::clone(&listener) as Arc<dyn Closer>);
            debug!(addr = %listener.local_addr(), "starting DNS-over-TCP server");
            tokio::spawn(DnsOverTcpServer::new(listener, Arc::clone(handler)).run());
        }

        if let Some(handler) = &config.dns_over_tls_handler {
            let tls = tls_config.expect("checked by caller");
            let listener = Arc::new(stack.listen("tcp", "[::]:853")?);
            self.pool.add(Arc::clone(&listener) as Arc<dyn Closer>);
            debug!(addr = %listener.local_addr(), "starting DNS-over-TLS server");
            let acceptor = TlsAcceptor::from(Arc::clone(tls));
            tokio::spawn(
                DnsOverTcpServer::new_with_tls(listener, Arc::clone(handler), acceptor).run(),
            );
        }

        if let Some(handler) = &config.http_handler {
            let listener = Arc::new(stack.listen("tcp", "[::]:80")?);
            self.pool.add(Arc::clone(&listener) as Arc<dyn Closer>);
            debug!(addr = %listener.local_addr(), "starting HTTP server");
            tokio::spawn(HttpServer::new(listener, Arc::clone(handler)).run());
        }

        if let Some(handler) = &config.https_handler {
            let tls = tls_config.expect("checked by caller");
            let listener = Arc::new(stack.listen("tcp", "[::]:443")?);
            self.pool.add(Arc::clone(&listener) as Arc<dyn Closer>);
            debug!(addr = %listener.local_addr(), "starting HTTPS server");
            let acceptor = TlsAcceptor::from(Arc::clone(tls));
            tokio::spawn(HttpServer::new_with_tls(listener, Arc::clone(handler), acceptor).run());
        }

        Ok(())
    }

    /// Releases every scenario resource in reverse insertion order.
    ///
    /// # Errors
    ///
    /// Joined close failures; see [`PoolError`].
    pub async fn close(&self) -> Result<(), PoolError> {
        self.pool.close().await
    }
}
