use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ReconcileError, Result};

/// First day the venue operated on the platform; earlier records are ignored.
pub const OPERATION_START_DATE: &str = "2025-05-28";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub platform: PlatformConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub store_id: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub roster_page_delay_ms: u64,
    pub card_page_size: usize,
    pub payment_page_size: usize,
    pub ledger_page_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            probe_timeout_secs: 5,
            page_delay_ms: 200,
            roster_page_delay_ms: 500,
            card_page_size: 100,
            payment_page_size: 50,
            ledger_page_size: 100,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconcileConfig {
    pub since_date: String,
    pub concurrency: usize,
    pub ledger_kind_code: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            since_date: OPERATION_START_DATE.to_string(),
            concurrency: 1,
            ledger_kind_code: "2".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifyConfig {
    /// Accuracy rate (percent) under which the caller raises an alert.
    pub accuracy_threshold: f64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { accuracy_threshold: 95.0 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: "output".to_string() }
    }
}

/// Upper bound on concurrent entity reconciliations; the remote shares
/// capacity with live booking traffic.
pub const MAX_CONCURRENCY: usize = 4;

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::load_from("config/default")
    }

    /// Load `path` (any format the config crate knows, extension optional),
    /// overlaid by `RECONCILE_<SECTION>__<KEY>` environment variables.
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RECONCILE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.platform.base_url.trim().is_empty() {
            return Err(ReconcileError::Config("platform.base_url is empty".to_string()));
        }
        if self.platform.store_id.trim().is_empty() {
            return Err(ReconcileError::Config("platform.store_id is empty".to_string()));
        }
        if self.platform.token.is_none() && self.platform.token_file.is_none() {
            return Err(ReconcileError::Config(
                "either platform.token or platform.token_file must be set".to_string(),
            ));
        }
        let f = &self.fetch;
        if f.card_page_size == 0 || f.payment_page_size == 0 || f.ledger_page_size == 0 {
            return Err(ReconcileError::Config("page sizes must be positive".to_string()));
        }
        self.since_date()?;
        Ok(())
    }

    pub fn since_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.reconcile.since_date, "%Y-%m-%d").map_err(|e| {
            ReconcileError::Config(format!(
                "invalid reconcile.since_date '{}': {}",
                self.reconcile.since_date, e
            ))
        })
    }

    pub fn concurrency(&self) -> usize {
        self.reconcile.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.probe_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            platform: PlatformConfig {
                base_url: "https://platform.example".to_string(),
                store_id: "1517".to_string(),
                token: Some("t".to_string()),
                token_file: None,
            },
            fetch: FetchConfig::default(),
            reconcile: ReconcileConfig::default(),
            retry: RetryConfig::default(),
            notify: NotifyConfig::default(),
            output: OutputConfig::default(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.since_date().unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 28).unwrap()
        );
    }

    #[test]
    fn test_missing_token_source_rejected() {
        let mut config = sample();
        config.platform.token = None;
        assert!(matches!(config.validate(), Err(ReconcileError::Config(_))));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = sample();
        config.fetch.ledger_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let mut config = sample();
        config.reconcile.concurrency = 0;
        assert_eq!(config.concurrency(), 1);
        config.reconcile.concurrency = 64;
        assert_eq!(config.concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn test_deserialize_with_section_defaults() {
        let raw = r#"{ "platform": { "base_url": "https://x", "store_id": "1", "token": "abc" } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.fetch.timeout_secs, 10);
        assert_eq!(config.fetch.payment_page_size, 50);
        assert_eq!(config.reconcile.ledger_kind_code, "2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_underscore_prefix_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[platform]\nbase_url = \"https://x\"\nstore_id = \"1517\"\ntoken_file = \"t.json\"\n",
        )
        .unwrap();

        std::env::set_var("RECONCILE_PLATFORM__TOKEN", "from-env");
        let config = Config::load_from(path.to_str().unwrap());
        std::env::remove_var("RECONCILE_PLATFORM__TOKEN");

        let config = config.unwrap();
        assert_eq!(config.platform.token.as_deref(), Some("from-env"));
        assert_eq!(config.platform.store_id, "1517");
    }
}
