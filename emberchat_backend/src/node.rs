use crate::api;
use crate::bootstrap;
use crate::config::EmberchatConfig;
use crate::files::FileStore;
use crate::hub::ConnectionHub;
use crate::lifecycle::FileLifecycleManager;
use crate::notify::Notifier;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

/// Convenience wrapper that bootstraps the relay once and hands out cloned
/// handles for whichever entrypoint (REST server, tests) needs them.
pub struct EmberchatNode {
    config: EmberchatConfig,
    store: FileStore,
    hub: ConnectionHub,
    notifier: Notifier,
    shutdown: CancellationToken,
}

impl EmberchatNode {
    /// Creates the storage areas, wires the hub, and starts the lifecycle
    /// sweep task (which runs its startup sweep immediately).
    pub async fn start(config: EmberchatConfig) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config)?;

        let http_client = reqwest::Client::builder()
            .user_agent("Emberchat/0.1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build shared HTTP client")?;
        let notifier = Notifier::new(http_client, config.notify_webhook.clone());

        let hub = ConnectionHub::new(notifier.clone());
        let store = FileStore::new(config.paths.clone(), config.public_base_url.clone());

        let shutdown = CancellationToken::new();
        FileLifecycleManager::new(
            store.clone(),
            hub.state(),
            config.lifecycle.clone(),
            shutdown.child_token(),
        )
        .spawn();

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            public_base_url = %config.public_base_url,
            "emberchat node initialized"
        );

        Ok(Self {
            config,
            store,
            hub,
            notifier,
            shutdown,
        })
    }

    pub async fn run_http_server(&self) -> Result<()> {
        api::serve_http(
            self.config.clone(),
            self.hub.clone(),
            self.store.clone(),
            self.notifier.clone(),
        )
        .await
    }

    pub fn hub(&self) -> ConnectionHub {
        self.hub.clone()
    }

    pub fn store(&self) -> FileStore {
        self.store.clone()
    }

    /// Stops the lifecycle sweep task; in-flight connections are unaffected.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
