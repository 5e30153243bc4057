//! TCP listener, optionally wrapped in TLS.
//!
//! All gateway state is per-connection; the server only accepts sockets and
//! spawns one handler task per client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::connection;

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let tls_acceptor = self.build_tls_acceptor()?;
        let listener = TcpListener::bind(self.config.listen_addr())
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr()))?;
        tracing::info!(
            addr = %self.config.listen_addr(),
            tls = tls_acceptor.is_some(),
            "listening"
        );
        let config = Arc::new(self.config);
        accept_loop(listener, tls_acceptor, config).await
    }

    /// Bind and return the local address plus the serving task, for tests.
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let tls_acceptor = self.build_tls_acceptor()?;
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "listening");
        let config = Arc::new(self.config);
        let handle = tokio::spawn(accept_loop(listener, tls_acceptor, config));
        Ok((addr, handle))
    }

    fn build_tls_acceptor(&self) -> Result<Option<TlsAcceptor>> {
        if !self.config.tls_enabled() {
            return Ok(None);
        }
        let cert_path = self.config.tls_cert.as_deref().unwrap();
        let key_path = self.config.tls_key.as_deref().unwrap();

        let cert_pem = std::fs::read(cert_path)
            .with_context(|| format!("failed to read TLS cert: {cert_path}"))?;
        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("failed to read TLS key: {key_path}"))?;

        let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse TLS certificates")?;
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .context("failed to parse TLS private key")?
            .context("no private key found in PEM file")?;

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("invalid TLS configuration")?;

        Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    config: Arc<ServerConfig>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let config = Arc::clone(&config);
        match tls_acceptor.clone() {
            Some(acceptor) => {
                tokio::spawn(async move {
                    if let Err(e) = handle_tls(stream, peer, acceptor, config).await {
                        tracing::error!(%peer, "connection error: {e:#}");
                    }
                });
            }
            None => {
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, config).await {
                        tracing::error!(%peer, "connection error: {e:#}");
                    }
                });
            }
        }
    }
}

async fn handle_tls(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    config: Arc<ServerConfig>,
) -> Result<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .context("TLS handshake failed")?;
    tracing::info!(%peer, "new connection (TLS)");
    connection::handle_generic(tls_stream, peer.ip(), config).await
}
