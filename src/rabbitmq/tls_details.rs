// src/rabbitmq/tls_details.rs
//
// lapin keeps its socket private, so session details come from a separate
// handshake against the same endpoint with the same trust settings.

use rustls::pki_types::ServerName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

use crate::env::RabbitMQConfig;
use crate::rabbitmq::errors::{RabbitMQError, Result};
use crate::rabbitmq::tls::TlsMaterial;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// What is known about the TLS session to the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TlsDetails {
    pub tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_subject: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_alt_names: Option<Vec<String>>,
}

impl TlsDetails {
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Handshakes with the broker endpoint and reports the negotiated session.
pub async fn inspect(config: &RabbitMQConfig) -> Result<TlsDetails> {
    let material = TlsMaterial::load(config)?;
    let connector = TlsConnector::from(Arc::new(material.client_config(config.verify_peer)?));

    let server_name = config.effective_server_hostname().to_string();
    let domain = ServerName::try_from(server_name.clone()).map_err(|e| {
        RabbitMQError::TlsError(format!("Invalid server hostname '{}': {}", server_name, e))
    })?;

    let tcp = timeout(HANDSHAKE_TIMEOUT, TcpStream::connect((config.host.as_str(), config.port)))
        .await?
        .map_err(|e| {
            RabbitMQError::ConnectionError(format!(
                "Failed to reach {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

    let mut stream = timeout(HANDSHAKE_TIMEOUT, connector.connect(domain, tcp))
        .await?
        .map_err(|e| RabbitMQError::TlsError(format!("TLS handshake failed: {}", e)))?;

    let (_, session) = stream.get_ref();
    let mut details = TlsDetails {
        tls: true,
        server_name: Some(server_name),
        cipher: session
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        version: session.protocol_version().map(|v| format!("{:?}", v)),
        ..TlsDetails::default()
    };

    if let Some(leaf) = session.peer_certificates().and_then(|certs| certs.first()) {
        match parse_x509_certificate(leaf.as_ref()) {
            Ok((_, cert)) => {
                details.peer_subject = Some(subject_of(&cert));
                details.peer_alt_names = Some(alt_names_of(&cert));
            }
            Err(e) => debug!(error = %e, "Could not parse broker certificate"),
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "TLS inspection shutdown failed");
    }

    Ok(details)
}

fn subject_of(cert: &X509Certificate<'_>) -> BTreeMap<String, String> {
    let subject = cert.subject();
    let mut fields = BTreeMap::new();
    let mut put = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            fields.insert(key.to_string(), value.to_string());
        }
    };

    put("commonName", subject.iter_common_name().next().and_then(|a| a.as_str().ok()));
    put("organizationName", subject.iter_organization().next().and_then(|a| a.as_str().ok()));
    put(
        "organizationalUnitName",
        subject.iter_organizational_unit().next().and_then(|a| a.as_str().ok()),
    );
    put("countryName", subject.iter_country().next().and_then(|a| a.as_str().ok()));
    put(
        "stateOrProvinceName",
        subject.iter_state_or_province().next().and_then(|a| a.as_str().ok()),
    );
    put("localityName", subject.iter_locality().next().and_then(|a| a.as_str().ok()));
    fields
}

fn alt_names_of(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Vec::new();
    };

    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(format!("DNS:{}", dns)),
            GeneralName::RFC822Name(email) => Some(format!("email:{}", email)),
            GeneralName::URI(uri) => Some(format!("URI:{}", uri)),
            GeneralName::IPAddress(bytes) => ip_from_bytes(bytes).map(|ip| format!("IP:{}", ip)),
            _ => None,
        })
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(Ipv4Addr::from(octets).to_string());
    }
    <[u8; 16]>::try_from(bytes)
        .ok()
        .map(|octets| Ipv6Addr::from(octets).to_string())
}
