/// Configuration module for managing environment variables and API keys
///
/// This module loads and validates all configuration values from
/// environment variables (typically from a .env file).

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::content::DayGrouping;

/// Which completion backend the content generator talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    /// Templated text, no network
    Mock,
    /// Real completion endpoint
    Http,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Completion backend selection ("mock" or "http")
    pub ai_provider: AiProvider,

    /// Completion endpoint (e.g., "https://api.openai.com/v1/completions")
    pub ai_api_url: String,

    /// API key for the completion endpoint, required when the provider is http
    pub ai_api_key: Option<String>,

    /// Completion model to use
    pub ai_model: String,

    /// Starting temperature before any training feedback arrives
    pub ai_temperature: f32,

    /// Upper bound on completion tokens per post
    pub ai_max_tokens: u32,

    /// Model context window used to clamp max_tokens against the prompt size
    pub ai_context_window: usize,

    /// How often due posts are checked, in seconds
    pub scheduler_interval_secs: u64,

    /// Artificial latency of the simulated publisher
    pub publish_delay_ms: u64,

    /// Number of feedback entries retained per account
    pub feedback_history_limit: usize,

    /// Day used to group posts in the messaging consistency report
    pub messaging_day_grouping: DayGrouping,

    /// Child-account profile backend (optional, in-memory profiles when unset)
    pub profile_api_url: Option<String>,

    /// Port for the control API
    pub http_port: u16,

    /// Bearer secret guarding the control API (optional)
    pub dashboard_api_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ai_provider: AiProvider::Mock,
            ai_api_url: "https://api.openai.com/v1/completions".to_string(),
            ai_api_key: None,
            ai_model: "gpt-3.5-turbo-instruct".to_string(),
            ai_temperature: 0.7,
            ai_max_tokens: 300,
            ai_context_window: 4096,
            scheduler_interval_secs: 60,
            publish_delay_ms: 1000,
            feedback_history_limit: 100,
            messaging_day_grouping: DayGrouping::Scheduled,
            profile_api_url: None,
            http_port: 8080,
            dashboard_api_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a value is malformed, or if AI_PROVIDER=http and
    /// AI_API_KEY is missing
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let defaults = Config::default();

        let ai_provider = match env::var("AI_PROVIDER")
            .unwrap_or_else(|_| "mock".to_string())
            .to_lowercase()
            .as_str()
        {
            "mock" => AiProvider::Mock,
            "http" | "openai" => AiProvider::Http,
            other => anyhow::bail!("AI_PROVIDER must be 'mock' or 'http', got '{}'", other),
        };

        let ai_api_key = match ai_provider {
            AiProvider::Http => Some(
                env::var("AI_API_KEY").context("AI_API_KEY must be set when AI_PROVIDER=http")?,
            ),
            AiProvider::Mock => env::var("AI_API_KEY").ok(),
        };

        let messaging_day_grouping = env::var("MESSAGING_DAY_GROUPING")
            .ok()
            .map(|v| v.parse::<DayGrouping>())
            .transpose()
            .context("MESSAGING_DAY_GROUPING must be 'scheduled' or 'today'")?
            .unwrap_or(defaults.messaging_day_grouping);

        Ok(Config {
            ai_provider,
            ai_api_key,

            ai_api_url: env::var("AI_API_URL")
                .unwrap_or(defaults.ai_api_url),

            ai_model: env::var("AI_MODEL")
                .unwrap_or(defaults.ai_model),

            ai_temperature: env::var("AI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ai_temperature),

            ai_max_tokens: env::var("AI_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ai_max_tokens),

            ai_context_window: env::var("AI_CONTEXT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ai_context_window),

            scheduler_interval_secs: env::var("SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scheduler_interval_secs),

            publish_delay_ms: env::var("PUBLISH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.publish_delay_ms),

            feedback_history_limit: env::var("FEEDBACK_HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.feedback_history_limit),

            messaging_day_grouping,

            profile_api_url: env::var("PROFILE_API_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string()),

            http_port: env::var("HTTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| {
                    // Default to PORT env var (Railway/Fly.io) or 8080
                    env::var("PORT")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(defaults.http_port)
                }),

            dashboard_api_secret: env::var("DASHBOARD_API_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    /// Validate value ranges and check the profile backend is reachable if one is configured
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        if !(0.0..=1.0).contains(&self.ai_temperature) {
            anyhow::bail!("AI_TEMPERATURE must be within 0..1, got {}", self.ai_temperature);
        }
        if self.ai_max_tokens == 0 {
            anyhow::bail!("AI_MAX_TOKENS must be greater than zero");
        }
        if self.ai_context_window <= self.ai_max_tokens as usize {
            anyhow::bail!(
                "AI_CONTEXT_WINDOW ({}) is too small for AI_MAX_TOKENS ({})",
                self.ai_context_window,
                self.ai_max_tokens
            );
        }
        if self.scheduler_interval_secs == 0 {
            anyhow::bail!("SCHEDULER_INTERVAL_SECS must be greater than zero");
        }
        if self.feedback_history_limit == 0 {
            anyhow::bail!("FEEDBACK_HISTORY_LIMIT must be greater than zero");
        }

        // The scheduler still runs on in-memory profiles if the backend is down
        if let Some(url) = &self.profile_api_url {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .context("Failed to create HTTP client")?;

            match client.get(url).send().await {
                Ok(resp) => {
                    log::info!("Profile backend reachable (status: {})", resp.status());
                }
                Err(e) => {
                    log::warn!("Profile backend at {} is not reachable: {}", url, e);
                }
            }
        }

        log::info!("Configuration validated successfully");
        Ok(())
    }
}
