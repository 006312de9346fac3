use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EmberchatConfig {
    pub api_port: u16,
    pub public_base_url: String,
    pub paths: EmberchatPaths,
    pub lifecycle: LifecycleConfig,
    pub file: FileConfig,
    pub notify_webhook: Option<String>,
}

impl EmberchatConfig {
    pub fn from_env() -> Result<Self> {
        let paths = EmberchatPaths::discover()?;
        let api_port = env::var("EMBERCHAT_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080);
        let public_base_url = env::var("EMBERCHAT_PUBLIC_URL")
            .ok()
            .map(|raw| raw.trim_end_matches('/').to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| format!("http://127.0.0.1:{api_port}"));
        let notify_webhook = env::var("EMBERCHAT_NOTIFY_WEBHOOK")
            .ok()
            .filter(|raw| !raw.trim().is_empty());
        Ok(Self {
            api_port,
            public_base_url,
            paths,
            lifecycle: LifecycleConfig::from_env(),
            file: FileConfig::from_env(),
            notify_webhook,
        })
    }

    pub fn new(api_port: u16, paths: EmberchatPaths, lifecycle: LifecycleConfig) -> Self {
        Self {
            api_port,
            public_base_url: format!("http://127.0.0.1:{api_port}"),
            paths,
            lifecycle,
            file: FileConfig::default(),
            notify_webhook: None,
        }
    }
}

/// Retention and reconciliation timing for the sweep task.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub sweep_interval: Duration,
    pub max_file_age: Duration,
    pub pending_ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            max_file_age: Duration::from_secs(600),
            pending_ttl: Duration::from_secs(900),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: env_duration("EMBERCHAT_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            max_file_age: env_duration("EMBERCHAT_MAX_FILE_AGE_SECS", defaults.max_file_age),
            pending_ttl: env_duration("EMBERCHAT_PENDING_TTL_SECS", defaults.pending_ttl),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileConfig {
    pub max_upload_bytes: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl FileConfig {
    pub fn from_env() -> Self {
        let max_upload_bytes = env::var("EMBERCHAT_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or_else(|| Self::default().max_upload_bytes);
        Self { max_upload_bytes }
    }
}

fn env_duration(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmberchatPaths {
    pub base: PathBuf,
    pub files_dir: PathBuf,
    pub public_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl EmberchatPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let files_dir = base.join("files");
        let public_dir = files_dir.join("public");
        let archive_dir = files_dir.join("archive");

        Ok(Self {
            base,
            files_dir,
            public_dir,
            archive_dir,
        })
    }
}
