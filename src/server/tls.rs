use crate::config::HttpsConfig;
use anyhow::{Context, Result};
use rustls::crypto::ring::{cipher_suite, default_provider, Ticketer};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::error;

/// The only suites the TLS listener negotiates.
pub fn cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
    ]
}

#[derive(Clone)]
pub struct TlsManager {
    acceptor: TlsAcceptor,
}

impl TlsManager {
    /// Loads the key pair named by the config. Failure is fatal for the process.
    pub fn new(https: &HttpsConfig) -> Result<Self> {
        let acceptor = Self::create_tls_acceptor(https).map_err(|e| {
            error!(
                error = %format!("{:#}", e),
                missing_cert = https.certificate_path.is_empty(),
                missing_key = https.key_path.is_empty(),
                "error loading keypair"
            );
            e
        })?;
        Ok(Self { acceptor })
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    fn create_tls_acceptor(https: &HttpsConfig) -> Result<TlsAcceptor> {
        let cert_chain = load_certificates(&https.certificate_path)?;
        let private_key = load_private_key(&https.key_path)?;

        let provider = CryptoProvider {
            cipher_suites: cipher_suites(),
            ..default_provider()
        };

        let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .context("Failed to restrict TLS protocol versions")?
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .context("Failed to build TLS configuration")?;

        config.ticketer = Ticketer::new().context("Failed to create session ticketer")?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn load_certificates(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .with_context(|| format!("Failed to open certificate file: {:?}", path))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate file: {:?}", path))?;

    if cert_chain.is_empty() {
        anyhow::bail!("No certificates found in {:?}", path);
    }
    Ok(cert_chain)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .with_context(|| format!("Failed to open private key file: {:?}", path))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to parse private key file: {:?}", path))?
        .with_context(|| format!("No private keys found in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn https(cert: &str, key: &str) -> HttpsConfig {
        HttpsConfig {
            server_name: "localhost".to_string(),
            listen_address: "127.0.0.1:0".to_string(),
            certificate_path: cert.to_string(),
            key_path: key.to_string(),
            is_offloaded: false,
        }
    }

    #[test]
    fn test_missing_credentials_fail() {
        assert!(TlsManager::new(&https("", "")).is_err());
    }

    #[test]
    fn test_empty_pem_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();

        let err = TlsManager::new(&https(cert.to_str().unwrap(), key.to_str().unwrap()))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("No certificates found"));
    }

    #[test]
    fn test_generated_keypair_loads() {
        let dir = tempfile::tempdir().unwrap();
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, generated.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key, generated.serialize_private_key_pem()).unwrap();

        assert!(TlsManager::new(&https(cert.to_str().unwrap(), key.to_str().unwrap())).is_ok());
    }

    #[test]
    fn test_allow_list_is_modern_only() {
        let suites = cipher_suites();
        assert_eq!(suites.len(), 5);
        for suite in suites {
            let name = format!("{:?}", suite.suite());
            assert!(name.contains("GCM") || name.contains("CHACHA20"), "{}", name);
        }
    }
}
