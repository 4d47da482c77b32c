//! Certificate handling for TLS broker connections.
//!
//! One [`rustls::ClientConfig`] serves both the broker connection and the
//! session inspection in `tls_details`, so `verify_peer` means the same thing
//! in both places.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::{self, File};
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::env::RabbitMQConfig;
use crate::rabbitmq::errors::{RabbitMQError, Result};

/// Makes ring the process-wide rustls provider; later calls are no-ops.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }
}

/// Fails unless `path` is set and names a regular file this process can open.
pub fn check_readable<'a>(path: Option<&'a Path>, label: &'static str) -> Result<&'a Path> {
    let path = path.ok_or(RabbitMQError::MissingTlsPath { label })?;

    if !path.is_file() {
        return Err(RabbitMQError::TlsFile {
            label,
            path: path.to_path_buf(),
            source: IoError::from(ErrorKind::NotFound),
        });
    }

    File::open(path).map_err(|source| RabbitMQError::TlsFile {
        label,
        path: path.to_path_buf(),
        source,
    })?;

    Ok(path)
}

fn read_checked(path: Option<&Path>, label: &'static str) -> Result<Vec<u8>> {
    let path = check_readable(path, label)?;
    fs::read(path).map_err(|source| RabbitMQError::TlsFile {
        label,
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// PEM contents of the CA bundle and optional client identity.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca_pem: Vec<u8>,
    pub identity: Option<ClientIdentity>,
}

impl TlsMaterial {
    /// Validates and reads the certificate files named by `config`.
    ///
    /// The CA certificate is mandatory. The client pair is only read when
    /// both halves are configured.
    pub fn load(config: &RabbitMQConfig) -> Result<Self> {
        let ca_pem = read_checked(config.ca_cert.as_deref(), "CA certificate")?;

        let identity = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert_pem: read_checked(Some(cert.as_path()), "Client certificate")?,
                key_pem: read_checked(Some(key.as_path()), "Client key")?,
            }),
            (None, None) => None,
            _ => {
                warn!("Only one of client certificate and key is set; connecting without a client identity");
                None
            }
        };

        debug!(
            mutual = identity.is_some(),
            "Loaded TLS material"
        );
        Ok(Self { ca_pem, identity })
    }

    /// rustls configuration for handshakes with the broker.
    ///
    /// With `verify_peer` off any server certificate and hostname is accepted.
    pub fn client_config(&self, verify_peer: bool) -> Result<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = if verify_peer {
            let mut roots = RootCertStore::empty();
            for cert in parse_certs(&self.ca_pem)? {
                roots.add(cert)?;
            }
            builder.with_root_certificates(roots)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        };

        let config = match &self.identity {
            Some(identity) => builder.with_client_auth_cert(
                parse_certs(&identity.cert_pem)?,
                parse_key(&identity.key_pem)?,
            )?,
            None => builder.with_no_client_auth(),
        };

        Ok(config)
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RabbitMQError::TlsError(format!("Failed to parse certificate PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(RabbitMQError::TlsError("No certificate found in PEM data".to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| RabbitMQError::TlsError(format!("Failed to parse private key PEM: {}", e)))?
        .ok_or_else(|| RabbitMQError::TlsError("No private key found in PEM data".to_string()))
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
