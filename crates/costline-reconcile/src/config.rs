//! Costline configuration
//!
//! Settings are read from an optional file, then overridden from the
//! environment (`COSTLINE__PROVIDER__API_KEY=...`). Every field has a default,
//! so an empty source yields a usable configuration apart from credentials.

use config::{Config, Environment, File, FileFormat};
use costline_common::{CostlineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::billing::PostProcessConfig;
use crate::metering::RetryPolicy;
use crate::pricing::CatalogConfig;

/// Environment variable naming the settings file
pub const CONFIG_PATH_ENV: &str = "COSTLINE_CONFIG";

const ENV_PREFIX: &str = "COSTLINE";

/// Public marketplace listing with Datadog list prices
pub const DEFAULT_MARKETPLACE_URL: &str =
    "https://aws.amazon.com/marketplace/pp/prodview-536p4hpqbajc2";

/// Costline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub catalog: CatalogSettings,
    pub postprocess: PostProcessConfig,
    /// Fetch the window before the first requested one to seed cumulative readings
    pub seed_prior_window: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            catalog: CatalogSettings::default(),
            postprocess: PostProcessConfig::datadog(),
            seed_prior_window: true,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if any), `.env` and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML document, without consulting the environment
    pub fn from_toml(document: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.refill_per_sec.is_nan() || self.rate_limit.refill_per_sec <= 0.0 {
            return Err(CostlineError::Config(
                "rate_limit.refill_per_sec must be positive".into(),
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(CostlineError::Config("rate_limit.burst must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CostlineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.catalog.tables.hours_per_month == 0 {
            return Err(CostlineError::Config(
                "catalog.tables.hours_per_month must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Fail unless both provider credentials are set
    pub fn require_credentials(&self) -> Result<()> {
        if self.provider.api_key.is_empty() || self.provider.app_key.is_empty() {
            return Err(CostlineError::Config(
                "provider.api_key and provider.app_key are required".into(),
            ));
        }
        Ok(())
    }
}

/// Provider API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Provider site, e.g. `datadoghq.com` or `datadoghq.eu`
    pub site: String,
    pub api_key: String,
    pub app_key: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            site: "datadoghq.com".to_string(),
            api_key: String::new(),
            app_key: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Token bucket shared by all provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub refill_per_sec: f64,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refill_per_sec: 0.1,
            burst: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.delay_secs),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_secs: 30,
        }
    }
}

/// Where list prices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    /// Scrape the public marketplace listing
    Marketplace,
    /// Derive unit prices from the account's estimated cost
    BillableUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub source: CatalogSource,
    pub marketplace_url: String,
    pub tables: CatalogConfig,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            source: CatalogSource::Marketplace,
            marketplace_url: DEFAULT_MARKETPLACE_URL.to_string(),
            tables: CatalogConfig::datadog(),
        }
    }
}
