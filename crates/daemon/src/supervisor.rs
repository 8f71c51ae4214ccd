use anonrelay_core::{
    IdentityStore, Overlay, OverlayConfig, OverlayListener, QuicOverlay, RelayEngine, StoreLoad,
    TcpDialer,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

/// Drives the relay from configuration to shutdown.
///
/// Stages run strictly in order: load or generate the config, start the
/// overlay transport, open the listener, then serve until the relay hits a
/// fatal error or shutdown is requested.
pub struct Supervisor {
    store: IdentityStore,
}

impl Supervisor {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            store: IdentityStore::new(config_path),
        }
    }

    /// Run until Ctrl+C or a fatal error
    pub async fn run(self) -> Result<()> {
        self.run_until(ctrl_c()).await
    }

    /// Run until `shutdown` resolves or a fatal error.
    ///
    /// Listener and transport are closed before returning either way.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let StoreLoad { config, generated } = self
            .store
            .load_or_generate()
            .with_context(|| format!("Failed to load config from {}", self.store.path().display()))?;

        if generated {
            warn!(
                "Config file doesn't exist, created one at {}",
                self.store.path().display()
            );
        } else {
            info!("Loaded config from {}", self.store.path().display());
        }

        info!("Starting overlay transport...");
        let transport = QuicOverlay::start(OverlayConfig::with_listen_addr(config.listen_addr))
            .await
            .context("Failed to start overlay transport")?;
        info!("Overlay transport started");

        info!("Starting the listener...");
        let mut listener = match transport
            .listen(&config.identity, &config.routing.exposed_ports)
            .await
        {
            Ok(listener) => listener,
            Err(e) => {
                transport.close();
                return Err(e).context("Failed to start the listener");
            }
        };
        info!(
            "Listener started on ports {:?}",
            config.routing.exposed_ports
        );

        let engine = RelayEngine::new(TcpDialer, &config.routing.local_target);
        info!(
            "Started proxying connections from {} to {}",
            listener.service_address(),
            engine.target()
        );

        let outcome: Result<()> = tokio::select! {
            err = engine.run(&mut listener) => Err(err.into()),
            () = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        listener.close();
        transport.close();
        info!("Relay stopped");

        outcome
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
