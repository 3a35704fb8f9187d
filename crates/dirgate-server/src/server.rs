//! LDAP listener

use dirgate_core::{config::GatewayConfig, Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::frontend::Frontend;
use crate::session::serve_connection;
use crate::tls::TlsAcceptor;

/// LDAP gateway server
pub struct GatewayServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    frontend: Arc<Frontend>,
    connections: Arc<Semaphore>,
}

impl GatewayServer {
    /// Bind the listener. TLS material is loaded here so a bad certificate
    /// fails startup rather than the first connection.
    pub async fn bind(config: &GatewayConfig, frontend: Frontend) -> Result<Self> {
        let tls = if config.tls.enabled {
            Some(TlsAcceptor::from_config(&config.tls)?)
        } else {
            None
        };

        let addr = config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        let scheme = if tls.is_some() { "ldaps" } else { "ldap" };

        info!(
            "Dirgate listening on {}://{}",
            scheme,
            listener.local_addr()?
        );
        info!(
            "Serving {} with RDN attribute {}",
            frontend.mapping().base_dn(),
            frontend.mapping().rdn_attribute()
        );

        Ok(Self {
            listener,
            tls,
            frontend: Arc::new(frontend),
            connections: Arc::new(Semaphore::new(config.server.max_connections.max(1))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// being served run to completion.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connections.clone().acquire_owned() => {
                    permit.map_err(|e| Error::Other(e.into()))?
                }
            };

            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let frontend = self.frontend.clone();
            let tls = self.tls.clone();

            tokio::spawn(
                async move {
                    let _permit = permit;
                    debug!("Connection accepted");

                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, &frontend).await,
                            Err(e) => warn!("TLS handshake failed: {}", e),
                        },
                        None => serve_connection(stream, &frontend).await,
                    }
                }
                .instrument(info_span!("connection", peer = %peer_addr)),
            );
        }

        info!("Stopped accepting connections");
        Ok(())
    }
}
