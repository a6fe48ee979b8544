//! Certificate authority for intercepted tunnels.
//!
//! Decrypting CONNECT traffic means terminating TLS with a certificate the
//! client will accept for the tunneled host. At startup a root CA is
//! generated in memory; for each intercepted host a leaf certificate is
//! signed on demand and the resulting rustls server configuration is cached,
//! so a host pays the signing cost once. Nothing is written to disk; clients
//! that should trust the proxy import [`MitmAuthority::ca_certificate_pem`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

/// In-memory signing authority plus the per-host configuration cache.
pub struct MitmAuthority {
    issuer: Issuer<'static, KeyPair>,
    ca_pem: String,
    configs: RwLock<HashMap<String, Arc<ServerConfig>>>,
}

impl MitmAuthority {
    /// Generates a fresh root CA for this process.
    pub fn new() -> anyhow::Result<Self> {
        // rustls needs a process-wide crypto provider before any config is
        // built; installing twice is harmless.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(
            DnType::CommonName,
            DnValue::Utf8String("mimic generated CA".to_string()),
        );
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let ca_cert = params.clone().self_signed(&key)?;
        let ca_pem = ca_cert.pem();
        let issuer = Issuer::new(params, key);

        Ok(Self {
            issuer,
            ca_pem,
            configs: RwLock::new(HashMap::new()),
        })
    }

    /// The root certificate in PEM form, for clients that opt into trusting
    /// this proxy.
    pub fn ca_certificate_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Returns the TLS server configuration impersonating `host`, signing a
    /// leaf certificate on first use.
    pub fn server_config(&self, host: &str) -> anyhow::Result<Arc<ServerConfig>> {
        if let Some(config) = self.configs.read().get(host) {
            return Ok(config.clone());
        }

        let config = Arc::new(self.forge(host)?);
        self.configs
            .write()
            .insert(host.to_string(), config.clone());
        Ok(config)
    }

    fn forge(&self, host: &str) -> anyhow::Result<ServerConfig> {
        let key = KeyPair::generate()?;
        let params = CertificateParams::new(vec![host.to_string()])?;
        let cert = params.signed_by(&key, &self.issuer)?;

        let key_der = PrivatePkcs8KeyDer::from(key.serialize_der());
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], PrivateKeyDer::Pkcs8(key_der))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}
