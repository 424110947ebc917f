//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::batcher::BatcherConfig;
use crate::error::IngestError;
use crate::types::ChainScope;

/// Sleep durations for one ingester loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Back-off after a failed iteration.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Pause after a batch completes.
    #[serde(default = "default_post_batch_ms")]
    pub post_batch_ms: u64,
    /// Pause when there is nothing to do.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_post_batch_ms() -> u64 {
    5_000
}

fn default_idle_ms() -> u64 {
    5_000
}

/// A partial pacing object; absent fields keep the loop's own defaults.
#[derive(Deserialize)]
struct PacingOverrides {
    error_backoff_ms: Option<u64>,
    post_batch_ms: Option<u64>,
    idle_ms: Option<u64>,
}

impl PacingOverrides {
    fn over(self, base: PacingConfig) -> PacingConfig {
        PacingConfig {
            error_backoff_ms: self.error_backoff_ms.unwrap_or(base.error_backoff_ms),
            post_batch_ms: self.post_batch_ms.unwrap_or(base.post_batch_ms),
            idle_ms: self.idle_ms.unwrap_or(base.idle_ms),
        }
    }
}

fn history_pacing<'de, D: Deserializer<'de>>(d: D) -> Result<PacingConfig, D::Error> {
    PacingOverrides::deserialize(d).map(|o| o.over(default_history_pacing()))
}

fn backfill_pacing<'de, D: Deserializer<'de>>(d: D) -> Result<PacingConfig, D::Error> {
    PacingOverrides::deserialize(d).map(|o| o.over(default_backfill_pacing()))
}

fn follower_pacing<'de, D: Deserializer<'de>>(d: D) -> Result<PacingConfig, D::Error> {
    PacingOverrides::deserialize(d).map(|o| o.over(default_follower_pacing()))
}

impl PacingConfig {
    pub fn with_idle_ms(idle_ms: u64) -> Self {
        Self {
            error_backoff_ms: default_error_backoff_ms(),
            post_batch_ms: default_post_batch_ms(),
            idle_ms,
        }
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn post_batch(&self) -> Duration {
        Duration::from_millis(self.post_batch_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

/// Tunables shared by the history, backfill and follower ingesters of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Coin label, e.g. "btc".
    #[serde(default = "default_coin")]
    pub coin: String,
    /// Network label, e.g. "mainnet".
    #[serde(default = "default_network")]
    pub network: String,
    /// Per-height concurrency.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Heights requested per selection.
    #[serde(default = "default_random_height_limit")]
    pub random_height_limit: usize,
    #[serde(default = "default_threshold")]
    pub transaction_flush_threshold: usize,
    #[serde(default = "default_threshold")]
    pub output_flush_threshold: usize,
    #[serde(default = "default_threshold")]
    pub input_flush_threshold: usize,
    /// Block bundles per writer flush.
    #[serde(default = "default_block_batcher_capacity")]
    pub block_batcher_capacity: usize,
    #[serde(default = "default_block_batcher_flush_interval_ms")]
    pub block_batcher_flush_interval_ms: u64,
    /// Writer flush calls per second.
    #[serde(default = "default_block_batcher_rps")]
    pub block_batcher_rps: f64,
    #[serde(default = "default_history_pacing", deserialize_with = "history_pacing")]
    pub history: PacingConfig,
    #[serde(default = "default_backfill_pacing", deserialize_with = "backfill_pacing")]
    pub backfill: PacingConfig,
    #[serde(default = "default_follower_pacing", deserialize_with = "follower_pacing")]
    pub follower: PacingConfig,
}

fn default_coin() -> String {
    "btc".into()
}

fn default_network() -> String {
    "mainnet".into()
}

fn default_worker_count() -> usize {
    50
}

fn default_random_height_limit() -> usize {
    10_000
}

fn default_threshold() -> usize {
    1_000
}

fn default_block_batcher_capacity() -> usize {
    500
}

fn default_block_batcher_flush_interval_ms() -> u64 {
    30_000
}

fn default_block_batcher_rps() -> f64 {
    1.0
}

fn default_history_pacing() -> PacingConfig {
    PacingConfig::with_idle_ms(60_000)
}

fn default_backfill_pacing() -> PacingConfig {
    PacingConfig::with_idle_ms(5_000)
}

fn default_follower_pacing() -> PacingConfig {
    PacingConfig::with_idle_ms(5_000)
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            coin: default_coin(),
            network: default_network(),
            worker_count: default_worker_count(),
            random_height_limit: default_random_height_limit(),
            transaction_flush_threshold: default_threshold(),
            output_flush_threshold: default_threshold(),
            input_flush_threshold: default_threshold(),
            block_batcher_capacity: default_block_batcher_capacity(),
            block_batcher_flush_interval_ms: default_block_batcher_flush_interval_ms(),
            block_batcher_rps: default_block_batcher_rps(),
            history: default_history_pacing(),
            backfill: default_backfill_pacing(),
            follower: default_follower_pacing(),
        }
    }
}

impl IngestConfig {
    /// Default tunables for the given chain.
    pub fn new(coin: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            coin: coin.into(),
            network: network.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn scope(&self) -> ChainScope {
        ChainScope::new(self.coin.clone(), self.network.clone())
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            flush_size: self.block_batcher_capacity,
            flush_interval: Duration::from_millis(self.block_batcher_flush_interval_ms),
            rps: self.block_batcher_rps,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.coin.is_empty() {
            return Err(IngestError::Config("coin must not be empty".into()));
        }
        if self.network.is_empty() {
            return Err(IngestError::Config("network must not be empty".into()));
        }
        if self.worker_count == 0 {
            return Err(IngestError::Config("worker_count must be positive".into()));
        }
        let positive = [
            ("random_height_limit", self.random_height_limit),
            ("transaction_flush_threshold", self.transaction_flush_threshold),
            ("output_flush_threshold", self.output_flush_threshold),
            ("input_flush_threshold", self.input_flush_threshold),
            ("block_batcher_capacity", self.block_batcher_capacity),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IngestError::Config(format!("{name} must be positive")));
            }
        }
        if self.block_batcher_flush_interval_ms == 0 {
            return Err(IngestError::Config(
                "block_batcher_flush_interval_ms must be positive".into(),
            ));
        }
        if !(self.block_batcher_rps.is_finite() && self.block_batcher_rps > 0.0) {
            return Err(IngestError::Config(format!(
                "block_batcher_rps must be positive, got {}",
                self.block_batcher_rps
            )));
        }
        Ok(())
    }
}
