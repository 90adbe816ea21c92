use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,

    /// Provider API key. When absent the simulated model is used.
    pub api_key: Option<String>,

    /// Upstream model identifier.
    pub model: String,

    /// Upstream API base URL, without a trailing slash.
    pub base_url: String,

    /// Interval between `ping` events on open streams. Zero disables pings.
    pub ping_interval: Duration,

    /// Delay between writing the `done` frame and closing the stream.
    pub close_delay: Duration,

    /// Client reconnection hint attached to the `start` frame.
    pub retry_hint_ms: Option<u64>,

    /// Optional system instruction sent with every upstream request.
    pub system_prompt: Option<String>,

    /// Upper bound on generated tokens per reply.
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            ping_interval: Duration::from_secs(15),
            close_delay: Duration::from_millis(100),
            retry_hint_ms: None,
            system_prompt: None,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// | Variable                       | Purpose                          |
    /// |--------------------------------|----------------------------------|
    /// | `CHATRELAY_ADDR`               | Bind address                     |
    /// | `GEMINI_API_KEY`               | Provider API key                 |
    /// | `GEMINI_MODEL`                 | Model identifier                 |
    /// | `GEMINI_BASE_URL`              | Upstream base URL                |
    /// | `CHATRELAY_PING_INTERVAL_SECS` | Ping interval (0 disables)       |
    /// | `CHATRELAY_CLOSE_DELAY_MS`     | Delay before closing after done  |
    /// | `CHATRELAY_RETRY_MS`           | Client retry hint                |
    /// | `CHATRELAY_SYSTEM_PROMPT`      | System instruction               |
    /// | `GEMINI_MAX_OUTPUT_TOKENS`     | Generation token limit           |
    /// | `GEMINI_TEMPERATURE`           | Sampling temperature             |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = non_empty("CHATRELAY_ADDR") {
            config.bind_addr = addr;
        }
        config.api_key = non_empty("GEMINI_API_KEY");
        if let Some(model) = non_empty("GEMINI_MODEL") {
            config.model = model;
        }
        if let Some(url) = non_empty("GEMINI_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_number(&non_empty, "CHATRELAY_PING_INTERVAL_SECS") {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_number(&non_empty, "CHATRELAY_CLOSE_DELAY_MS") {
            config.close_delay = Duration::from_millis(ms);
        }
        config.retry_hint_ms = parse_number(&non_empty, "CHATRELAY_RETRY_MS");
        config.system_prompt = non_empty("CHATRELAY_SYSTEM_PROMPT");
        config.max_output_tokens = parse_number(&non_empty, "GEMINI_MAX_OUTPUT_TOKENS");
        config.temperature = parse_number(&non_empty, "GEMINI_TEMPERATURE");
        config
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn with_retry_hint_ms(mut self, ms: u64) -> Self {
        self.retry_hint_ms = Some(ms);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

fn parse_number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable numeric setting");
            None
        }
    }
}
