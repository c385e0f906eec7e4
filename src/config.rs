//! Tap configuration, loaded from the JSON file named by `--config`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use shopify_api::ClientConfig;

const DEFAULT_START_DATE: &str = "1970-01-01T00:00:00Z";
const DEFAULT_API_VERSION: &str = "2025-01";
const DEFAULT_RESULTS_PER_PAGE: u32 = 175;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Keys that must be present and non-empty. Checked by name before
/// deserialization so a broken config fails fast, with the key named,
/// ahead of any network activity.
const REQUIRED_CONFIG_KEYS: &[&str] = &["shop", "api_key"];

#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    /// Store subdomain or full myshopify domain.
    pub shop: String,
    /// Admin API access token.
    pub api_key: String,
    /// Replication floor for streams that have no bookmark yet.
    #[serde(default = "default_start_date")]
    pub start_date: String,
    /// Admin API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Page size for REST listings and GraphQL connections.
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_start_date() -> String {
    DEFAULT_START_DATE.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_results_per_page() -> u32 {
    DEFAULT_RESULTS_PER_PAGE
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl TapConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw).context("config file is not valid JSON")?;
        for key in REQUIRED_CONFIG_KEYS {
            let present = value
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|v| !v.is_empty());
            if !present {
                bail!("config is missing required key '{key}'");
            }
        }
        let config: TapConfig = serde_json::from_value(value).context("invalid config file")?;
        Ok(config)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            shop: self.shop.clone(),
            access_token: self.api_key.clone(),
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}
