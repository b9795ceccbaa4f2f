//! Sync, remote and enrichment configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine and its scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic cycles.
    pub interval_secs: u64,

    /// Entries pushed concurrently per batch.
    pub push_batch_size: usize,

    /// Upper bound on the periodic delay after repeated failures (seconds).
    pub max_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            push_batch_size: 20,
            max_backoff_secs: 600,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs).max(self.interval())
    }

    /// Delay before the next periodic cycle after `failures` consecutive
    /// failed cycles: the interval, doubled per failure, capped.
    pub fn periodic_delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.interval()
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff())
    }
}

/// Connection settings for the REST remote store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `"https://xyz.supabase.co"`.
    pub base_url: String,

    /// Public API key sent as the `apikey` header.
    pub api_key: String,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_timeout_secs: default_timeout_secs(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the chat-completions enrichment client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub cleanup_temperature: f32,
    pub tag_temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            model: "Llama-3.2-1B-Instruct-q4f16_1-MLC".to_string(),
            cleanup_temperature: 0.3,
            tag_temperature: 0.5,
            max_tokens: 2000,
            request_timeout_secs: 60,
        }
    }
}
