use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

pub struct TlsServer {
    pub port: u16,
    /// Self-signed server certificate, usable as the client's CA bundle.
    pub ca_path: PathBuf,
    handshake: oneshot::Receiver<bool>,
    dir: TempDir,
}

impl TlsServer {
    /// Whether the server side completed a TLS handshake.
    pub async fn handshake_completed(self) -> bool {
        matches!(
            timeout(Duration::from_secs(10), self.handshake).await,
            Ok(Ok(true))
        )
    }

    /// Writes a certificate the server was not issued from.
    pub fn unrelated_ca(&self) -> PathBuf {
        write_self_signed(self.dir.path(), "unrelated", "other-ca")
    }
}

fn write_self_signed(dir: &Path, name: &str, common_name: &str) -> PathBuf {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let path = dir.join(format!("{}.pem", name));
    std::fs::write(&path, cert.pem()).unwrap();
    path
}

// Accepts a single TLS session for `localhost` and drains it until the client closes.
pub async fn spawn_tls_server() -> TlsServer {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "rabbit-test");
    dn.push(DnType::OrganizationName, "Example");
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let ca_path = dir.path().join("ca.pem");
    std::fs::write(&ca_path, cert.pem()).unwrap();

    let server_config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(
        vec![cert.der().clone()],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    )
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done, handshake) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else {
            let _ = done.send(false);
            return;
        };
        match acceptor.accept(tcp).await {
            Ok(mut tls) => {
                let _ = done.send(true);
                let mut sink = Vec::new();
                let _ = tls.read_to_end(&mut sink).await;
            }
            Err(_) => {
                let _ = done.send(false);
            }
        }
    });

    TlsServer {
        port,
        ca_path,
        handshake,
        dir,
    }
}
