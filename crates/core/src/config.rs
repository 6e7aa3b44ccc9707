use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CampaignError, CampaignResult};

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CAMPAIGN_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Delivery pipeline tuning: retries, backoff, and worker concurrency.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Retries after the first attempt for a transport failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on members being delivered to at the same time.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_concurrency_limit() -> usize {
    10
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            concurrency_limit: default_concurrency_limit(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (which take precedence).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        debug!(path = ?path, node_id = %config.node_id, "Configuration sources merged");
        Ok(config)
    }

    pub fn validate(&self) -> CampaignResult<()> {
        let d = &self.delivery;
        if d.concurrency_limit == 0 {
            return Err(CampaignError::Config(
                "delivery.concurrency_limit must be at least 1".into(),
            ));
        }
        if !(d.backoff_multiplier >= 1.0) {
            return Err(CampaignError::Config(format!(
                "delivery.backoff_multiplier must be >= 1.0, got {}",
                d.backoff_multiplier
            )));
        }
        if d.initial_backoff_ms > d.max_backoff_ms {
            return Err(CampaignError::Config(format!(
                "delivery.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                d.initial_backoff_ms, d.max_backoff_ms
            )));
        }
        if d.max_retries == 0 {
            warn!("delivery.max_retries is 0; transport failures will not be retried");
        }
        Ok(())
    }
}
