//! TLS configuration and support for secure connections.
//!
//! TLS is selected through the URI scheme: `graphwire+s` verifies the server
//! certificate against trusted roots, `graphwire+ssc` encrypts but accepts
//! any certificate (self-signed deployments). Plain `graphwire` skips TLS.

use crate::{Error, Result};
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pemfile::Item;
use std::fs;
use std::sync::Arc;

/// Encryption level requested by the connection URI scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encryption {
    /// No TLS (plaintext connection)
    #[default]
    Disabled,
    /// TLS with full certificate and hostname verification
    Verified,
    /// TLS that accepts any server certificate
    TrustAny,
}

impl Encryption {
    /// Whether this level requires a TLS handshake
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Verified => write!(f, "verified"),
            Self::TrustAny => write!(f, "trust-any"),
        }
    }
}

/// TLS configuration for encrypted connections.
///
/// By default, server certificates are validated against system root
/// certificates, falling back to the bundled webpki roots when the system
/// store yields nothing.
///
/// # Examples
///
/// ```ignore
/// use graphwire::connection::TlsConfig;
///
/// // With system root certificates (production)
/// let tls = TlsConfig::builder().build()?;
///
/// // With custom CA certificate
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/path/to/ca.pem")
///     .build()?;
///
/// // For development (danger: disables verification)
/// let tls = TlsConfig::builder()
///     .trust_any_certificate(true)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// Path to CA certificate file (None = use system roots)
    ca_cert_path: Option<String>,
    /// Whether certificate verification is disabled
    trust_any_certificate: bool,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Build the TLS configuration matching an encryption level.
    ///
    /// Returns `None` for [`Encryption::Disabled`]. A custom CA bundle only
    /// applies to [`Encryption::Verified`].
    pub fn for_encryption(
        encryption: Encryption,
        ca_cert_path: Option<&str>,
    ) -> Result<Option<TlsConfig>> {
        match encryption {
            Encryption::Disabled => Ok(None),
            Encryption::Verified => {
                let mut builder = Self::builder();
                if let Some(path) = ca_cert_path {
                    builder = builder.ca_cert_path(path);
                }
                Ok(Some(builder.build()?))
            }
            Encryption::TrustAny => {
                Ok(Some(Self::builder().trust_any_certificate(true).build()?))
            }
        }
    }

    /// Get the rustls ClientConfig for this TLS configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Check if certificate verification is disabled (development only)
    pub fn trust_any_certificate(&self) -> bool {
        self.trust_any_certificate
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_cert_path", &self.ca_cert_path)
            .field("trust_any_certificate", &self.trust_any_certificate)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration
#[derive(Default)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<String>,
    trust_any_certificate: bool,
}

impl TlsConfigBuilder {
    /// Set the path to a custom CA certificate file (PEM format).
    ///
    /// If not set, system root certificates will be used.
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// ⚠️ **DANGER**: Accept any server certificate (development only).
    ///
    /// **NEVER use in production.** This disables certificate and hostname
    /// validation entirely, making the connection vulnerable to
    /// man-in-the-middle attacks. Only use for testing against servers with
    /// self-signed certificates.
    pub fn trust_any_certificate(mut self, trust: bool) -> Self {
        self.trust_any_certificate = trust;
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA certificate file cannot be read or contains
    /// no valid certificates.
    pub fn build(self) -> Result<TlsConfig> {
        let client_config = if self.trust_any_certificate {
            let provider = rustls::crypto::CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
            Arc::new(
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                    .with_no_client_auth(),
            )
        } else {
            let root_store = if let Some(ca_path) = &self.ca_cert_path {
                self.load_custom_ca(ca_path)?
            } else {
                // System roots first, bundled webpki roots when the system
                // store yields nothing usable
                let result = rustls_native_certs::load_native_certs();

                let mut store = RootCertStore::empty();
                for cert in result.certs {
                    let _ = store.add_parsable_certificates(std::iter::once(cert));
                }
                if store.is_empty() {
                    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                }

                store
            };

            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        };

        Ok(TlsConfig {
            ca_cert_path: self.ca_cert_path,
            trust_any_certificate: self.trust_any_certificate,
            client_config,
        })
    }

    /// Load a custom CA certificate from a PEM file
    fn load_custom_ca(&self, ca_path: &str) -> Result<RootCertStore> {
        let ca_cert_data = fs::read(ca_path).map_err(|e| {
            Error::Config(format!(
                "failed to read CA certificate file '{}': {}",
                ca_path, e
            ))
        })?;

        let mut reader = std::io::Cursor::new(&ca_cert_data);
        let mut root_store = RootCertStore::empty();
        let mut found_certs = 0;

        loop {
            match rustls_pemfile::read_one(&mut reader) {
                Ok(Some(Item::X509Certificate(cert))) => {
                    let _ = root_store.add_parsable_certificates(std::iter::once(cert));
                    found_certs += 1;
                }
                Ok(Some(_)) => {
                    // Skip non-certificate items (private keys, etc.)
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(Error::Config(format!(
                        "failed to parse CA certificate from '{}'",
                        ca_path
                    )));
                }
            }
        }

        if found_certs == 0 {
            return Err(Error::Config(format!(
                "no valid certificates found in '{}'",
                ca_path
            )));
        }

        Ok(root_store)
    }
}

/// Certificate verifier that accepts anything the server presents.
///
/// Signatures are still checked with the provider's algorithms so the
/// handshake itself stays well-formed.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls_pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error>
    {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls_pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error>
    {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is empty, too long, or contains
/// characters not valid in a DNS name.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    // Remove trailing dot if present
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
    {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_builder_defaults() {
        let builder = TlsConfigBuilder::default();
        assert!(!builder.trust_any_certificate);
        assert!(builder.ca_cert_path.is_none());
    }

    #[test]
    fn test_tls_config_trust_any() {
        let tls = TlsConfig::builder()
            .trust_any_certificate(true)
            .build()
            .expect("Failed to build TLS config");

        assert!(tls.trust_any_certificate());
    }

    #[test]
    fn test_for_encryption_disabled_is_none() {
        let tls = TlsConfig::for_encryption(Encryption::Disabled, None).unwrap();
        assert!(tls.is_none());
    }

    #[test]
    fn test_for_encryption_trust_any() {
        let tls = TlsConfig::for_encryption(Encryption::TrustAny, None)
            .unwrap()
            .unwrap();
        assert!(tls.trust_any_certificate());
    }

    #[test]
    fn test_for_encryption_missing_ca_file_fails() {
        let result =
            TlsConfig::for_encryption(Encryption::Verified, Some("/nonexistent/ca.pem"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_server_name_valid() {
        assert!(parse_server_name("localhost").is_ok());
        assert!(parse_server_name("example.com").is_ok());
        assert!(parse_server_name("graph.internal.example.com").is_ok());
    }

    #[test]
    fn test_parse_server_name_trailing_dot() {
        let result = parse_server_name("example.com.");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_server_name_rejects_invalid_chars() {
        assert!(parse_server_name("").is_err());
        assert!(parse_server_name("host with spaces").is_err());
        assert!(parse_server_name("host_underscore").is_err());
    }

    #[test]
    fn test_encryption_display() {
        assert_eq!(Encryption::Disabled.to_string(), "disabled");
        assert_eq!(Encryption::Verified.to_string(), "verified");
        assert_eq!(Encryption::TrustAny.to_string(), "trust-any");
    }

    #[test]
    fn test_encryption_default() {
        assert_eq!(Encryption::default(), Encryption::Disabled);
        assert!(!Encryption::Disabled.is_enabled());
        assert!(Encryption::Verified.is_enabled());
        assert!(Encryption::TrustAny.is_enabled());
    }

    #[test]
    fn test_tls_config_debug() {
        let tls = TlsConfig::builder()
            .trust_any_certificate(true)
            .build()
            .expect("Failed to build TLS config");

        let debug_str = format!("{:?}", tls);
        assert!(debug_str.contains("TlsConfig"));
        assert!(debug_str.contains("trust_any_certificate"));
    }
}
