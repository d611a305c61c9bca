use crate::domain::fee::FeeSchedule;
use crate::domain::limits::LimitPolicy;
use crate::domain::wallet::AccountId;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime settings. Every field has a default, so a YAML file only needs
/// the keys it overrides.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub use_json: bool,
    pub currency: String,
    /// Wallet credited with every fee leg. Opened lazily on first fee.
    pub house_account: String,
    /// Label used as the counterparty of top-ups and withdrawals.
    pub external_account: String,
    /// Overall bound on one atomic money movement, lock waits included.
    pub transfer_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub dynamic_qr_ttl_secs: i64,
    pub limits: LimitPolicy,
    pub fees: FeeSchedule,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_json: false,
            currency: "USD".to_string(),
            house_account: "house".to_string(),
            external_account: "external".to_string(),
            transfer_timeout_ms: 5_000,
            cache_ttl_secs: 300,
            dynamic_qr_ttl_secs: 900,
            limits: LimitPolicy::default(),
            fees: FeeSchedule::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PaymentError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| PaymentError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn dynamic_qr_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dynamic_qr_ttl_secs)
    }

    pub fn house(&self) -> AccountId {
        AccountId::from(self.house_account.as_str())
    }

    pub fn external(&self) -> AccountId {
        AccountId::from(self.external_account.as_str())
    }
}
