//! Configuration for cobra-ingest
//!
//! Extends the shared bootstrap config with the watcher, pipeline and client
//! sections. Secrets resolve with ENV → TOML priority.

use crate::utils::backoff::RetryPolicy;
use cobra_common::config::{ChannelConfig, TomlConfig};
use cobra_common::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const OPENAI_API_KEY_ENV_VAR: &str = "COBRA_OPENAI_API_KEY";
pub const DISCORD_WEBHOOK_ENV_VAR: &str = "COBRA_DISCORD_WEBHOOK_URL";
pub const YOUTUBE_API_KEY_ENV_VAR: &str = "COBRA_YOUTUBE_API_KEY";

/// Complete `cobra.toml` as seen by the ingest service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(flatten)]
    pub base: TomlConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub transcript: TranscriptConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub youtube: YoutubeConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl IngestConfig {
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.base.channels
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.pipeline.workers == 0 {
            return Err(cobra_common::Error::Config(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(cobra_common::Error::Config(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.openai.requests_per_second == 0 {
            return Err(cobra_common::Error::Config(
                "openai.requests_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[watcher]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between feed polls
    pub poll_interval_secs: u64,
    /// Per-request timeout for feed fetches
    pub fetch_timeout_secs: u64,
    /// Attempts per channel per tick before the channel is skipped
    pub fetch_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Enqueue every not-fully-enriched video once per this many ticks (0 disables)
    pub resume_every_ticks: u64,
    pub feed_base_url: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            fetch_timeout_secs: 30,
            fetch_max_attempts: 3,
            retry_initial_ms: 500,
            retry_max_ms: 8_000,
            resume_every_ticks: 60,
            feed_base_url: "https://www.youtube.com/feeds/videos.xml".to_string(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_max_attempts,
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent enrichment workers
    pub workers: usize,
    /// Bounded work queue capacity
    pub queue_capacity: usize,
    /// Attempts per stage before the video is marked stalled
    pub stage_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Timeout for one external call within a stage
    pub call_timeout_secs: u64,
    /// How long shutdown waits for in-flight videos
    pub shutdown_grace_secs: u64,
    /// Maximum total wait on SQLite lock contention per commit
    pub db_lock_wait_ms: u64,
    /// Optional plain-text transcript archive
    pub archive_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            stage_max_attempts: 4,
            retry_initial_ms: 1_000,
            retry_max_ms: 30_000,
            call_timeout_secs: 120,
            shutdown_grace_secs: 30,
            db_lock_wait_ms: 5_000,
            archive_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn stage_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.stage_max_attempts,
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// `[openai]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Prefer COBRA_OPENAI_API_KEY over this field
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    /// Embedding input is truncated to this many characters
    pub max_input_chars: usize,
    pub requests_per_second: u32,
    /// Summarization prompt for channels without their own
    pub default_system_prompt: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_input_chars: 24_000,
            requests_per_second: 5,
            default_system_prompt:
                "You summarize YouTube video transcripts accurately and concisely.".to_string(),
        }
    }
}

/// `[transcript]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub base_url: String,
    pub language: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.youtube.com/api/timedtext".to_string(),
            language: "en".to_string(),
        }
    }
}

/// `[notify]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Prefer COBRA_DISCORD_WEBHOOK_URL over this field
    pub discord_webhook_url: Option<String>,
    /// Prefix messages with `@everyone`
    pub mention_everyone: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            mention_everyone: true,
        }
    }
}

/// `[youtube]` section (Data API, used by backfill)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub api_base_url: String,
    /// Prefer COBRA_YOUTUBE_API_KEY over this field
    pub api_key: Option<String>,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: None,
        }
    }
}

/// `[api]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:5740".to_string(),
        }
    }
}

impl ApiConfig {
    /// Base URL a local client uses to reach the running service
    ///
    /// A wildcard bind address (`0.0.0.0`, `[::]`) is reached through loopback.
    pub fn local_base_url(&self) -> Result<String> {
        let mut addr: SocketAddr = self.bind_address.parse().map_err(|e| {
            cobra_common::Error::Config(format!("api.bind_address '{}': {}", self.bind_address, e))
        })?;
        if addr.ip().is_unspecified() {
            let loopback: IpAddr = if addr.is_ipv4() {
                Ipv4Addr::LOCALHOST.into()
            } else {
                Ipv6Addr::LOCALHOST.into()
            };
            addr.set_ip(loopback);
        }
        Ok(format!("http://{}", addr))
    }
}

/// Resolve a secret from ENV → TOML
///
/// Returns `None` when neither source holds a non-blank value.
pub fn resolve_secret(label: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in both {} and TOML config. Using environment (highest priority).",
            label, env_var
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(value);
    }

    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", label);
        return Some(value.to_string());
    }

    None
}

/// Validate secret (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
