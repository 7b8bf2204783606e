//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::balance::BalanceOptions;
use crate::format::is_valid_address;
use crate::session::SessionOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Watch-only accounts returned for account requests
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            timeout_ms: default_timeout_ms(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Reconnect on startup if the wallet already authorized us
    #[serde(default)]
    pub auto_connect: bool,
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions::default().auto_connect(self.auto_connect)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl BalanceConfig {
    pub fn options(&self) -> BalanceOptions {
        BalanceOptions {
            auto_refresh: self.auto_refresh,
            refresh_interval: Some(Duration::from_millis(self.refresh_interval_ms)),
            on_balance_changed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing the key-value store
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_refresh_interval_ms() -> u64 {
    5_000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("storage.json")
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("provider.rpc_url", default_rpc_url())?
            .set_default("provider.timeout_ms", default_timeout_ms() as i64)?
            .set_default("balance.refresh_interval_ms", default_refresh_interval_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix YD_WALLET_)
            .add_source(
                config::Environment::with_prefix("YD_WALLET")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("provider.accounts"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.provider.rpc_url.trim().is_empty() {
            anyhow::bail!("provider.rpc_url must not be empty");
        }

        url::Url::parse(&self.provider.rpc_url)
            .with_context(|| format!("Invalid provider.rpc_url: {}", self.provider.rpc_url))?;

        if self.provider.timeout_ms == 0 {
            anyhow::bail!("provider.timeout_ms must be positive");
        }

        for account in &self.provider.accounts {
            if !is_valid_address(account) {
                anyhow::bail!("Invalid account address: {}", account);
            }
        }

        if self.balance.auto_refresh && self.balance.refresh_interval_ms == 0 {
            anyhow::bail!("balance.refresh_interval_ms must be positive when auto_refresh is on");
        }

        if self.balance.auto_refresh && self.balance.refresh_interval_ms < 1_000 {
            tracing::warn!(
                "balance.refresh_interval_ms is {}ms - public RPC endpoints may rate limit this",
                self.balance.refresh_interval_ms
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Provider:
    rpc_url: {}
    timeout: {}ms
    accounts: {}
  Session:
    auto_connect: {}
  Balance:
    auto_refresh: {}
    refresh_interval: {}ms
  Storage:
    path: {}
"#,
            mask_url(&self.provider.rpc_url),
            self.provider.timeout_ms,
            if self.provider.accounts.is_empty() {
                "(none)".to_string()
            } else {
                self.provider.accounts.join(", ")
            },
            self.session.auto_connect,
            self.balance.auto_refresh,
            self.balance.refresh_interval_ms,
            self.storage.path.display(),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.rpc_url, "http://127.0.0.1:8545");
        assert!(!config.session.auto_connect);
        assert_eq!(config.balance.refresh_interval_ms, 5_000);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[provider]
rpc_url = "https://rpc.example.org"
accounts = ["0x1234567890123456789012345678901234567890"]

[session]
auto_connect = true

[balance]
auto_refresh = true
refresh_interval_ms = 2000
"#,
        )
        .unwrap();

        let config = assert_ok!(Config::load(&path));
        assert_eq!(config.provider.rpc_url, "https://rpc.example.org");
        assert_eq!(config.provider.accounts.len(), 1);
        assert!(config.session.options().auto_connect);
        assert_eq!(
            config.balance.options().refresh_interval,
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.provider.timeout_ms, 10_000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.provider.accounts = vec!["0xnope".to_string()];
        assert_err!(config.validate());

        let mut config = Config::default();
        config.balance.auto_refresh = true;
        config.balance.refresh_interval_ms = 0;
        assert_err!(config.validate());

        let mut config = Config::default();
        config.provider.rpc_url = "not a url".to_string();
        assert_err!(config.validate());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://mainnet.example.com/v3?key=secret"),
            "https://mainnet.example.com/v3?***"
        );
        assert_eq!(mask_url("http://127.0.0.1:8545"), "http://127.0.0.1:8545");
    }
}
