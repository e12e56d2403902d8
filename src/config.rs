use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::locator::DEFAULT_HOST_MARKER;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchCfg {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_jitter_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchCfg {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            attempts: 3,
            backoff_base_ms: 250,
            backoff_factor: 2.0,
            backoff_jitter_ms: 100,
            user_agent: None,
        }
    }
}

/// Where the command-line host keeps documents, uploads and state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteCfg {
    pub documents_dir: PathBuf,
    pub library_dir: PathBuf,
    pub library_base_url: String,
    pub database_url: String,
}

impl Default for SiteCfg {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("site/documents"),
            library_dir: PathBuf::from("site/uploads"),
            library_base_url: "/uploads".into(),
            database_url: "sqlite://site/rehost.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterCfg {
    pub host_marker: String,
    pub concurrency: usize,
    pub outcome_ttl_secs: u64,
    pub fetch: FetchCfg,
    pub site: SiteCfg,
}

impl Default for ImporterCfg {
    fn default() -> Self {
        Self {
            host_marker: DEFAULT_HOST_MARKER.into(),
            concurrency: 4,
            outcome_ttl_secs: 300,
            fetch: FetchCfg::default(),
            site: SiteCfg::default(),
        }
    }
}

impl ImporterCfg {
    pub fn from_yaml(txt: &str) -> Result<Self, serde_yaml::Error> {
        let mut cfg: Self = serde_yaml::from_str(txt)?;
        cfg.concurrency = cfg.concurrency.max(1);
        Ok(cfg)
    }

    /// Reads the file if it exists, otherwise falls back to defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(txt) => Ok(Self::from_yaml(&txt)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
