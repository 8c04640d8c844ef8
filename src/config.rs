use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use connect_sdk::{Network, RouterOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE: &str = "config.json";
const STORE_FILE: &str = "connect.sqlite";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Host configuration, read from `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Network written to the store by `init`.
    pub network: Network,
    /// Electrum server override. Defaults per network.
    pub electrum_url: Option<String>,
    /// Esplora REST override for asset metadata. Defaults per network.
    pub esplora_url: Option<String>,
    /// Address the page/UI transport listens on.
    pub listen: String,
    /// Base URL of the approval UI; routes are appended as `#/<route>`.
    pub approval_ui_url: String,
    /// Program used to open the approval UI, invoked with the full URL.
    /// Without one the URL is only logged.
    pub approval_opener: Option<String>,
    pub approval_timeout_secs: Option<u64>,
    pub sync_interval_secs: u64,
    /// sat/vbyte
    pub fee_rate: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::Liquid,
            electrum_url: None,
            esplora_url: None,
            listen: "127.0.0.1:7655".to_string(),
            approval_ui_url: "http://127.0.0.1:7656".to_string(),
            approval_opener: None,
            approval_timeout_secs: None,
            sync_interval_secs: 60,
            fee_rate: connect_sdk::router::DEFAULT_FEE_RATE,
        }
    }
}

impl AppConfig {
    /// Load `config.json` from `data_dir`, writing the defaults on first run.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            fs::create_dir_all(data_dir)?;
            let config = Self::default();
            fs::write(&path, serde_json::to_string_pretty(&config)?)?;
            log::info!("wrote default config to {}", path.display());
            return Ok(config);
        }
        let config: Self = serde_json::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fee_rate.is_finite() && self.fee_rate > 0.0) {
            return Err(ConfigError::Invalid(format!("fee rate {}", self.fee_rate)));
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid("sync interval must be positive".into()));
        }
        Ok(())
    }

    pub fn electrum_url(&self, network: Network) -> String {
        self.electrum_url
            .clone()
            .unwrap_or_else(|| network.default_electrum_url().to_string())
    }

    pub fn esplora_url(&self, network: Network) -> String {
        self.esplora_url
            .clone()
            .unwrap_or_else(|| network.esplora_url().to_string())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            fee_rate: self.fee_rate,
            approval_timeout: self.approval_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn store_path(data_dir: &Path) -> PathBuf {
        data_dir.join(STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
        // reading it back yields the same config
        assert_eq!(AppConfig::load_or_create(dir.path()).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"network":"liquidtestnet","electrumUrl":"tcp://127.0.0.1:60401","approvalTimeoutSecs":30}"#,
        )
        .unwrap();
        let config = AppConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(config.network, Network::LiquidTestnet);
        assert_eq!(config.electrum_url(Network::LiquidTestnet), "tcp://127.0.0.1:60401");
        assert_eq!(
            config.esplora_url(Network::LiquidTestnet),
            Network::LiquidTestnet.esplora_url()
        );
        assert_eq!(
            config.router_options().approval_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.listen, "127.0.0.1:7655");
    }

    #[test]
    fn rejects_bad_fee_rate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"feeRate":0}"#).unwrap();
        assert!(matches!(
            AppConfig::load_or_create(dir.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
