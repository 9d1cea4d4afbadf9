//! Well-known host configurations for common test scenarios.

use std::sync::Arc;

use http::StatusCode;

use crate::netstack::Stack;

use super::http::{DnsHttpHandler, PathMux, TextHandler};
use super::{Scenario, StackConfig};

impl Scenario {
    /// Creates a stack simulating `dns.google` (8.8.8.8).
    ///
    /// Serves DNS over UDP, TCP, and TLS from the scenario database, plus
    /// HTTPS with a DNS-over-HTTPS endpoint at `/dns-query`.
    ///
    /// # Panics
    ///
    /// On invalid composition, like [`Scenario::must_new_stack`].
    pub fn must_new_google_dns_stack(&self) -> Arc<Stack> {
        let doh = Arc::new(DnsHttpHandler::new(self.dns_handler()));
        let mux = PathMux::new(Arc::new(TextHandler::ok("Google Public DNS server.\n")))
            .route("/dns-query", doh);
        self.must_new_stack(
            &StackConfig::new()
                .with_domain_name("dns.google")
                .with_domain_name("dns.google.com")
                .with_address("2001:4860:4860::8888".parse().unwrap())
                .with_address("8.8.8.8".parse().unwrap())
                .with_dns_over_udp_handler(self.dns_handler())
                .with_dns_over_tcp_handler(self.dns_handler())
                .with_dns_over_tls_handler(self.dns_handler())
                .with_https_handler(Arc::new(mux)),
        )
    }

    /// Creates a stack simulating `www.example.com` (93.184.216.34).
    ///
    /// # Panics
    ///
    /// On invalid composition, like [`Scenario::must_new_stack`].
    pub fn must_new_example_com_stack(&self) -> Arc<Stack> {
        self.must_new_stack(
            &StackConfig::new()
                .with_domain_name("www.example.com")
                .with_domain_name("example.com")
                .with_domain_name("www.example.org")
                .with_domain_name("example.org")
                .with_address("2606:2800:21f:cb07:6820:80da:af6b:8b2c".parse().unwrap())
                .with_address("93.184.216.34".parse().unwrap())
                .with_http_handler(Arc::new(TextHandler::ok("Example Web Server.\n")))
                .with_https_handler(Arc::new(TextHandler::ok("Example Web Server.\n"))),
        )
    }

    /// Creates a client stack with standard testing configuration.
    ///
    /// The addresses are GARR's (Italian Research & Education Network)
    /// public addresses, chosen over documentation ranges to avoid
    /// triggering bogon filters in downstream tooling. Resolvers point at
    /// Google's public DNS.
    ///
    /// # Panics
    ///
    /// On invalid composition, like [`Scenario::must_new_stack`].
    pub fn must_new_client_stack(&self) -> Arc<Stack> {
        self.must_new_stack(
            &StackConfig::new()
                .with_address("193.206.158.22".parse().unwrap())
                .with_address("2001:760:0:158::22".parse().unwrap())
                .with_client_resolver("8.8.8.8".parse().unwrap())
                .with_client_resolver("2001:4860:4860::8888".parse().unwrap()),
        )
    }

    /// Creates a stack simulating a censorship blockpage server.
    ///
    /// # Panics
    ///
    /// On invalid composition, like [`Scenario::must_new_stack`].
    pub fn must_new_blockpage_stack(&self) -> Arc<Stack> {
        self.must_new_stack(
            &StackConfig::new()
                .with_address("10.10.34.35".parse().unwrap())
                .with_http_handler(Arc::new(TextHandler::with_status(
                    StatusCode::FORBIDDEN,
                    "Access to this website has been blocked by network policy.\n",
                ))),
        )
    }
}
