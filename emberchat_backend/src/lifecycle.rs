use crate::config::LifecycleConfig;
use crate::files::{FileScope, FileStore};
use crate::hub::RelayState;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ages public files into the archive area and keeps the resolution map
/// consistent with that archival. Runs once at startup, then on a fixed
/// interval for the lifetime of the process unless its cancellation token
/// fires.
pub struct FileLifecycleManager {
    store: FileStore,
    state: Arc<Mutex<RelayState>>,
    config: LifecycleConfig,
    shutdown: CancellationToken,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub archived: usize,
    pub invalidated: usize,
    pub evicted: usize,
    pub failures: usize,
}

impl FileLifecycleManager {
    pub fn new(
        store: FileStore,
        state: Arc<Mutex<RelayState>>,
        config: LifecycleConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            state,
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            max_file_age_secs = self.config.max_file_age.as_secs(),
            "file lifecycle manager starting"
        );

        // Startup sweep shares the code path of the periodic one.
        self.tick().await;

        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("file lifecycle manager stopping");
                    break;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    /// One scheduled run. A sweep-level failure is logged and swallowed so
    /// the next timer tick proceeds regardless.
    pub async fn tick(&self) {
        match self.sweep().await {
            Ok(report) => {
                if report != SweepReport::default() {
                    tracing::info!(
                        examined = report.examined,
                        archived = report.archived,
                        invalidated = report.invalidated,
                        evicted = report.evicted,
                        failures = report.failures,
                        "lifecycle sweep finished"
                    );
                }
            }
            Err(err) => {
                tracing::error!(error = ?err, "lifecycle sweep failed");
            }
        }
    }

    /// Archives every public file older than the threshold and invalidates
    /// its resolution entry, then evicts pending messages past their TTL.
    /// Per-file failures are logged and skipped, never aborting the rest.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        let files = self
            .store
            .list_area(FileScope::Public)
            .await
            .context("failed to list public files")?;

        for file in files {
            report.examined += 1;
            let age = now
                .duration_since(file.created)
                .unwrap_or(Duration::ZERO);
            if age <= self.config.max_file_age {
                continue;
            }

            match self.store.archive(&file.name).await {
                Ok(()) => {
                    report.archived += 1;
                    let url = self.store.public_url(&file.name);
                    let mut state = self.state.lock().await;
                    for key in state.resolutions.invalidate_by_url(&url) {
                        report.invalidated += 1;
                        tracing::info!(
                            key = %key,
                            url = %url,
                            "invalidated resolution for archived file"
                        );
                    }
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(
                        file = %file.name,
                        error = ?err,
                        "failed to archive aged file, skipping"
                    );
                }
            }
        }

        let evicted = {
            let mut state = self.state.lock().await;
            state
                .pending
                .evict_older_than(self.config.pending_ttl, Utc::now())
        };
        report.evicted = evicted.len();
        for entry in &evicted {
            tracing::warn!(
                message_id = %entry.message.id,
                unresolved = entry.unresolved.len(),
                "evicting pending message past upload TTL"
            );
        }

        Ok(report)
    }
}
