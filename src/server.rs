//! Login server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{self, AuthBackend, EndpointState, FileStorage, InMemoryStorage, Storage};
use crate::config::{Config, StorageKind};
use crate::provider::OidcProviderFactory;
use crate::{Error, Result};

/// HTTP server for the authentication endpoint set
pub struct Server {
    config: Config,
    backend: Arc<AuthBackend>,
}

impl Server {
    /// Create a server; storage is opened here, the provider is built lazily
    pub fn new(config: Config) -> Result<Self> {
        let storage: Arc<dyn Storage> = match config.storage.kind {
            StorageKind::Memory => {
                warn!("Using in-memory storage; configuration and roles are lost on restart");
                Arc::new(InMemoryStorage::new())
            }
            StorageKind::File => {
                let root = config.storage.resolved_path();
                info!(path = %root.display(), "Using file storage");
                Arc::new(FileStorage::new(root)?)
            }
        };
        let factory = Arc::new(OidcProviderFactory::new(config.provider.clone()));
        let backend = Arc::new(AuthBackend::new(storage, factory, config.max_lease_ttl));

        Ok(Self { config, backend })
    }

    /// The authentication engine served by this server
    #[must_use]
    pub fn backend(&self) -> &Arc<AuthBackend> {
        &self.backend
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        if self.config.admin_token.is_none() {
            warn!("No admin_token configured; config and role endpoints are disabled");
        }

        let state = Arc::new(EndpointState {
            backend: Arc::clone(&self.backend),
            admin_token: self.config.admin_token.clone(),
        });
        let app = backend::router(state, self.config.mount());

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, mount = %self.config.mount(), "oidc-login server listening");

        let shutdown = CancellationToken::new();
        let graceful = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
        });

        tokio::select! {
            result = &mut server => {
                return result
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .map_err(Error::Io);
            }
            () = shutdown_signal() => {}
        }

        shutdown.cancel();
        let grace = self.config.server.shutdown_timeout;
        match tokio::time::timeout(grace, &mut server).await {
            Ok(joined) => joined
                .map_err(|e| Error::Internal(e.to_string()))?
                .map_err(Error::Io)?,
            Err(_) => {
                warn!(grace = ?grace, "In-flight requests did not finish; aborting");
                server.abort();
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_is_created_under_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let mut config = Config::default();
        config.storage.kind = StorageKind::File;
        config.storage.path = root.display().to_string();

        let server = Server::new(config);

        assert!(server.is_ok());
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn invalid_host_is_a_config_error() {
        let mut config = Config::default();
        config.server.host = "not a host".to_string();

        let result = Server::new(config).unwrap().run().await;

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
