//! Simulated PKI.
//!
//! [`SimPki`] owns a self-signed root CA and mints leaf certificates for
//! scenario stacks. Issued material is cached as PEM files in a
//! caller-supplied directory, so repeated runs reuse the same CA and
//! certificates. Clients validate against [`SimPki::root_store`].

use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;

/// PKI failures.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Cache directory or file I/O failed.
    #[error("PKI cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    /// TLS configuration rejected the generated material.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// A cached PEM file is unusable.
    #[error("invalid cached PEM at {path}")]
    InvalidCache { path: String },
}

/// Configuration for one issued server certificate.
#[derive(Debug, Clone, Default)]
pub struct CertConfig {
    /// Certificate common name (also the cache key).
    pub common_name: String,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// IP subject alternative names.
    pub ip_addrs: Vec<IpAddr>,
}

/// A certificate chain and private key ready for a rustls server.
pub struct TlsIdentity {
    /// Leaf plus issuing CA.
    pub chain: Vec<CertificateDer<'static>>,
    /// The leaf private key.
    pub key: PrivateKeyDer<'static>,
}

/// The simulated certification authority.
pub struct SimPki {
    cache_dir: PathBuf,
    ca_key: KeyPair,
    ca_cert: rcgen::Certificate,
    roots: Arc<RootCertStore>,
}

static INIT_CRYPTO: Once = Once::new();

/// Installs the process-wide rustls crypto provider once.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl SimPki {
    /// Opens (or creates) a PKI rooted at `cache_dir`.
    ///
    /// # Errors
    ///
    /// Fails if the cache directory cannot be created or holds unusable
    /// PEM material, or if CA generation fails.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, PkiError> {
        install_crypto_provider();
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;

        let key_path = cache_dir.join("ca.key");
        let cert_path = cache_dir.join("ca.pem");
        let (ca_key, ca_cert) = if key_path.exists() && cert_path.exists() {
            let ca_key = KeyPair::from_pem(&fs::read_to_string(&key_path)?)?;
            let params = CertificateParams::from_ca_cert_pem(&fs::read_to_string(&cert_path)?)?;
            let ca_cert = params.self_signed(&ca_key)?;
            (ca_key, ca_cert)
        } else {
            let ca_key = KeyPair::generate()?;
            let mut params = CertificateParams::new(Vec::<String>::new())?;
            params
                .distinguished_name
                .push(DnType::CommonName, "netsim simulated root CA");
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            let ca_cert = params.self_signed(&ca_key)?;
            fs::write(&key_path, ca_key.serialize_pem())?;
            fs::write(&cert_path, ca_cert.pem())?;
            (ca_key, ca_cert)
        };

        let mut roots = RootCertStore::empty();
        roots.add(ca_cert.der().clone())?;

        Ok(Self {
            cache_dir,
            ca_key,
            ca_cert,
            roots: Arc::new(roots),
        })
    }

    /// The root store clients should trust.
    #[must_use]
    pub fn root_store(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// A rustls client configuration trusting this PKI.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        let config = ClientConfig::builder()
            .with_root_certificates(Arc::clone(&self.roots))
            .with_no_client_auth();
        Arc::new(config)
    }

    /// Issues (or reloads from cache) a server certificate.
    ///
    /// # Errors
    ///
    /// Fails on unusable cache files or generation errors.
    pub fn issue(&self, config: &CertConfig) -> Result<TlsIdentity, PkiError> {
        let cert_path = self.cache_dir.join(format!("{}.pem", config.common_name));
        let key_path = self.cache_dir.join(format!("{}.key", config.common_name));
        if cert_path.exists() && key_path.exists() {
            return self.load_cached(&cert_path, &key_path);
        }

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(config.dns_names.clone())?;
        for addr in &config.ip_addrs {
            params.subject_alt_names.push(SanType::IpAddress(*addr));
        }
        params
            .distinguished_name
            .push(DnType::CommonName, config.common_name.as_str());
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key)?;

        fs::write(&cert_path, cert.pem())?;
        fs::write(&key_path, key.serialize_pem())?;
        tracing::debug!(common_name = %config.common_name, "issued certificate");

        Ok(TlsIdentity {
            chain: vec![cert.der().clone(), self.ca_cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        })
    }

    /// A rustls server configuration with a freshly issued certificate.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SimPki::issue`].
    pub fn server_config(&self, config: &CertConfig) -> Result<Arc<ServerConfig>, PkiError> {
        let identity = self.issue(config)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(identity.chain, identity.key)?;
        Ok(Arc::new(config))
    }

    fn load_cached(
        &self,
        cert_path: &std::path::Path,
        key_path: &std::path::Path,
    ) -> Result<TlsIdentity, PkiError> {
        let cert_pem = fs::read(cert_path)?;
        let leaf = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .next()
            .transpose()?
            .ok_or_else(|| PkiError::InvalidCache {
                path: cert_path.display().to_string(),
            })?;

        let key_pem = fs::read(key_path)?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?.ok_or_else(|| {
            PkiError::InvalidCache {
                path: key_path.display().to_string(),
            }
        })?;

        Ok(TlsIdentity {
            chain: vec![leaf, self.ca_cert.der().clone()],
            key,
        })
    }
}

impl std::fmt::Debug for SimPki {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPki")
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}
