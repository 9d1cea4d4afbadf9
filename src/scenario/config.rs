//! Stack configuration for scenarios.

use std::net::IpAddr;
use std::sync::Arc;

use crate::dns::Handler as DnsHandler;

use super::http::HttpHandler;

/// Configuration for one scenario stack.
///
/// `addresses` is required; everything else is optional. Handlers switch
/// on the corresponding server: DNS-over-UDP and DNS-over-TCP on port 53,
/// DNS-over-TLS on 853, HTTP on 80, HTTPS on 443. The TLS-based servers
/// require at least one domain name, since the stack certificate is issued
/// for the configured names.
#[derive(Default, Clone)]
pub struct StackConfig {
    /// Local IP addresses for this stack (at least one required).
    pub addresses: Vec<IpAddr>,
    /// DNS names registered in the scenario database and included in the
    /// stack certificate.
    pub domain_names: Vec<String>,
    /// DNS server IPs the stack uses when dialing by name (port 53, UDP).
    pub client_resolvers: Vec<IpAddr>,
    /// Serve DNS-over-UDP on `[::]:53`.
    pub dns_over_udp_handler: Option<Arc<dyn DnsHandler>>,
    /// Serve plaintext DNS-over-TCP on `[::]:53`.
    pub dns_over_tcp_handler: Option<Arc<dyn DnsHandler>>,
    /// Serve DNS-over-TLS on `[::]:853`.
    pub dns_over_tls_handler: Option<Arc<dyn DnsHandler>>,
    /// Serve HTTP on `[::]:80`.
    pub http_handler: Option<Arc<dyn HttpHandler>>,
    /// Serve HTTPS on `[::]:443`.
    pub https_handler: Option<Arc<dyn HttpHandler>>,
}

impl StackConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a local address.
    #[must_use]
    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    /// Adds a domain name.
    #[must_use]
    pub fn with_domain_name(mut self, name: impl Into<String>) -> Self {
        self.domain_names.push(name.into());
        self
    }

    /// Adds a client resolver address.
    #[must_use]
    pub fn with_client_resolver(mut self, addr: IpAddr) -> Self {
        self.client_resolvers.push(addr);
        self
    }

    /// Enables DNS-over-UDP with the given handler.
    #[must_use]
    pub fn with_dns_over_udp_handler(mut self, handler: Arc<dyn DnsHandler>) -> Self {
        self.dns_over_udp_handler = Some(handler);
        self
    }

    /// Enables DNS-over-TCP with the given handler.
    #[must_use]
    pub fn with_dns_over_tcp_handler(mut self, handler: Arc<dyn DnsHandler>) -> Self {
        self.dns_over_tcp_handler = Some(handler);
        self
    }

    /// Enables DNS-over-TLS with the given handler.
    #[must_use]
    pub fn with_dns_over_tls_handler(mut self, handler: Arc<dyn DnsHandler>) -> Self {
        self.dns_over_tls_handler = Some(handler);
        self
    }

    /// Enables HTTP with the given handler.
    #[must_use]
    pub fn with_http_handler(mut self, handler: Arc<dyn HttpHandler>) -> Self {
        self.http_handler = Some(handler);
        self
    }

    /// Enables HTTPS with the given handler.
    #[must_use]
    pub fn with_https_handler(mut self, handler: Arc<dyn HttpHandler>) -> Self {
        self.https_handler = Some(handler);
        self
    }

    /// Whether any TLS-terminating server is requested.
    pub(crate) fn wants_tls(&self) -> bool {
        self.dns_over_tls_handler.is_some() || self.https_handler.is_some()
    }
}
