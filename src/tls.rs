//! TLS certificate loading and HTTPS serving.

use std::{fs::File, future::Future, io::BufReader, net::SocketAddr, path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::TlsSettings;

/// Build a rustls server config from PEM certificate and key files.
pub fn server_config(tls: &TlsSettings) -> Result<rustls::ServerConfig> {
    let certs = load_certs(&tls.cert)?;
    let key = load_key(&tls.key)?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS config")
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("opening certificate {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("parsing certificate {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("opening private key {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("parsing private key {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

/// Serve the router over TLS until `shutdown` resolves.
///
/// Each accepted connection is handshaken and driven on its own task;
/// handshake failures are logged and dropped without affecting the
/// accept loop.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: &TlsSettings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let config = server_config(tls)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening (tls)");
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => res?,
            _ = &mut shutdown => return Ok(()),
        };
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%peer, error = %err, "tls handshake failed");
                    return;
                }
            };
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                warn!(%peer, error = %err, "connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_cert_file_errors() {
        let dir = TempDir::new().unwrap();
        let tls = TlsSettings {
            cert: dir.path().join("missing.pem"),
            key: dir.path().join("missing-key.pem"),
        };
        assert!(server_config(&tls).is_err());
    }

    #[test]
    fn cert_file_without_certificates_errors() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "not a certificate\n").unwrap();
        fs::write(&key, "not a key\n").unwrap();
        let err = server_config(&TlsSettings { cert, key }).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }

    #[test]
    fn key_file_without_key_errors() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key.pem");
        fs::write(&key, "garbage\n").unwrap();
        let err = load_key(&key).unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }

    fn fixture_tls() -> TlsSettings {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        TlsSettings {
            cert: fixtures.join("localhost-cert.pem"),
            key: fixtures.join("localhost-key.pem"),
        }
    }

    #[test]
    fn fixture_certificate_builds_a_server_config() {
        assert!(server_config(&fixture_tls()).is_ok());
    }

    #[tokio::test]
    async fn serves_requests_over_tls() {
        use axum::routing::get;
        use rustls::pki_types::ServerName;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let tls = fixture_tls();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let app = Router::new().route("/healthz", get(|| async { "ok" }));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let cert_path = tls.cert.clone();
        let handle = tokio::spawn(async move {
            serve(addr, app, &tls, shutdown).await.unwrap();
        });

        // a client trusting the self-signed certificate as its root
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(&cert_path).unwrap() {
            roots.add(cert).unwrap();
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let mut attempts = 0;
        let tcp = loop {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(tcp) => break tcp,
                Err(err) => {
                    attempts += 1;
                    if attempts >= 50 {
                        panic!("listener never came up: {err:?}");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        };
        let name = ServerName::try_from("localhost").unwrap();
        let mut stream = connector.connect(name, tcp).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 4096];
        let mut text = String::new();
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    text.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if text.contains("\r\n\r\n") && text.ends_with("ok") {
                        break;
                    }
                }
            }
        }
        assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {text}");
        assert!(text.ends_with("ok"), "unexpected response: {text}");
        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }
}
