//! rustls server configuration for secure sessions.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, SupportedProtocolVersion};

use crate::common::TlsVersion;

/// AES-256 first, no CBC or static-RSA suites.
fn provider() -> CryptoProvider {
    use ring::cipher_suite::*;

    CryptoProvider {
        cipher_suites: vec![
            TLS13_AES_256_GCM_SHA384,
            TLS13_AES_128_GCM_SHA256,
            TLS13_CHACHA20_POLY1305_SHA256,
            TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ],
        kx_groups: vec![
            ring::kx_group::SECP384R1,
            ring::kx_group::SECP256R1,
            ring::kx_group::X25519,
        ],
        ..ring::default_provider()
    }
}

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(min: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    match min {
        TlsVersion::Tls12 => rustls::ALL_VERSIONS,
        TlsVersion::Tls13 => TLS13_ONLY,
    }
}

fn build(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    min: TlsVersion,
) -> Result<ServerConfig> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(provider()))
        .with_protocol_versions(protocol_versions(min))
        .context("Unsupported TLS protocol configuration")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Certificate and private key do not form a valid pair")?;

    // The transfer server only speaks HTTP/1.1
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Server config from PEM certificate chain and private key files.
pub fn server_config(cert: &Path, key: &Path, min: TlsVersion) -> Result<RustlsConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("Failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert.display()))?;
    anyhow::ensure!(
        !certs.is_empty(),
        "No certificate found in {}",
        cert.display()
    );

    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("Failed to read private key {}", key.display()))?;

    let config = build(certs, key, min)?;
    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Ephemeral self-signed config for the advertised host.
pub fn self_signed_config(host: &str, min: TlsVersion) -> Result<RustlsConfig> {
    let mut names = vec![host.trim_matches(['[', ']']).to_string()];
    if host != "localhost" {
        names.push("localhost".to_string());
    }
    let certified = generate_simple_self_signed(names)
        .context("Failed to generate self-signed certificate")?;

    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = build(vec![cert], key, min)?;
    tracing::debug!(host, "Generated self-signed certificate");
    Ok(RustlsConfig::from_config(Arc::new(config)))
}
