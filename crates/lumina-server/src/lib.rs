//! Offline metadata-sharing server speaking the lumina protocol.
//!
//! Clients of a commercial disassembler push per-function metadata keyed by
//! function signatures and pull metadata for signatures they computed
//! locally. This crate provides the runtime around the sans-IO
//! [`lumina_proto`] codec: the [`Store`] holding the knowledge base, the
//! TCP/TLS [`transport`](crate::transport), and the per-connection session
//! handler.
//!
//! # Components
//!
//! - [`Store`]: signature-keyed map with whole-file snapshot persistence
//! - [`Server`]: accept loop, one independent session task per connection
//! - [`LicensePolicy`]: pluggable handshake check ([`AcceptAll`] default)
//!
//! Sessions are short: one handshake, one command, one reply. All sessions
//! share the store; nothing else is shared between them.

#![forbid(unsafe_code)]

mod error;
mod license;
mod session;
mod store;
pub mod transport;

use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

pub use error::{ServerError, StoreError};
pub use license::{AcceptAll, LicensePolicy};
pub use store::Store;
use tokio::task::JoinSet;
pub use transport::{ClientStream, Incoming, Listener};

/// Server runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Path to a TLS certificate (PEM). Requires `key_path`; absent means
    /// plaintext.
    pub cert_path: Option<PathBuf>,
    /// Path to the TLS private key (PEM). Requires `cert_path`.
    pub key_path: Option<PathBuf>,
    /// Per-read and per-write socket timeout
    pub io_timeout: Duration,
    /// How long in-flight sessions may run after shutdown is requested
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4443)),
            cert_path: None,
            key_path: None,
            io_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The lumina server: a bound listener plus the shared store.
pub struct Server {
    listener: Listener,
    store: Store,
    license: Arc<dyn LicensePolicy>,
    config: ServerConfig,
}

impl Server {
    /// Validate the configuration and bind the listener.
    ///
    /// A certificate without a key (or the reverse) is a configuration
    /// error, as is a failing bind. The store is taken already opened so a
    /// load failure surfaces before any socket exists.
    pub async fn bind(config: ServerConfig, store: Store) -> Result<Self, ServerError> {
        let tls = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => Some(transport::load_tls_config(cert, key)?),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ServerError::Config("certificate requires a key".to_string()));
            },
            (None, Some(_)) => {
                return Err(ServerError::Config("key requires a certificate".to_string()));
            },
        };

        let listener = Listener::bind(config.bind_addr, tls).await?;

        Ok(Self { listener, store, license: Arc::new(AcceptAll), config })
    }

    /// Replace the license check. The default accepts every client.
    #[must_use]
    pub fn with_license_policy(mut self, policy: Arc<dyn LicensePolicy>) -> Self {
        self.license = policy;
        self
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr()
    }

    /// Run until interrupted (ctrl-c), then shut down gracefully.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves.
    ///
    /// On shutdown the listener stops accepting, in-flight sessions get the
    /// configured grace period to finish (stragglers are aborted), and the
    /// store is saved one final time.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tracing::info!(
            addr = %self.local_addr()?,
            tls = self.listener.is_tls(),
            "server started"
        );

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok(incoming) => {
                        let peer = incoming.peer;
                        tracing::debug!(%peer, "new client");

                        let store = self.store.clone();
                        let license = Arc::clone(&self.license);
                        let io_timeout = self.config.io_timeout;

                        sessions.spawn(async move {
                            let mut stream = match incoming.establish().await {
                                Ok(stream) => stream,
                                Err(err) => {
                                    tracing::error!(%peer, %err, "session setup failed");
                                    return;
                                },
                            };

                            if let Err(err) = session::run_session(
                                &mut stream,
                                &store,
                                license.as_ref(),
                                io_timeout,
                            )
                            .await
                            {
                                tracing::error!(%peer, %err, "session failed");
                            }
                        });
                    },
                    Err(err) => tracing::error!(%err, "accept failed"),
                },
                // Reap finished session tasks so the set stays small
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {},
            }
        }

        if !sessions.is_empty() {
            tracing::info!(in_flight = sessions.len(), "draining sessions");
            let drain = async {
                while sessions.join_next().await.is_some() {}
            };
            if tokio::time::timeout(self.config.shutdown_grace, drain).await.is_err() {
                tracing::warn!("grace period expired, aborting remaining sessions");
                sessions.abort_all();
            }
        }

        self.store.close(true)?;
        tracing::info!("server stopped");
        Ok(())
    }
}
