//! Runtime configuration with defaults, overlaid by `settings.*` entries read
//! from the key-value store.

use std::time::Duration;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kv::KeyValueStore;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Serialize)]
pub struct CoreConfig {
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub interaction: InteractionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeminiConfig {
    pub base_url: String,
    /// Tried in order until one produces text.
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    pub rate_limit: RateLimitConfig,
    pub gemini: GeminiConfig,
    pub openai: OpenAiConfig,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionConfig {
    pub streaming: bool,
    pub error_dismiss: Duration,
    pub speech_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig { capacity: 50 },
            llm: LlmConfig::default(),
            interaction: InteractionConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 10,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            models: vec![
                "gemini-3-pro-preview".to_string(),
                "gemini-2.5-pro".to_string(),
                "gemini-2.5-flash".to_string(),
            ],
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: "gpt-4-turbo-preview".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            gemini: GeminiConfig::default(),
            openai: OpenAiConfig::default(),
            temperature: 0.7,
            max_output_tokens: 600,
            request_timeout: Duration::from_secs(45),
        }
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            error_dismiss: Duration::from_secs(5),
            speech_timeout: Duration::from_secs(30),
        }
    }
}

/// Read the persisted overrides on top of [`CoreConfig::default`].
pub fn load_config(kv: &dyn KeyValueStore) -> CoreConfig {
    let mut config = CoreConfig::default();
    if let Some(capacity) = read_setting::<usize>(kv, "settings.memory.capacity") {
        config.memory.capacity = capacity.max(1);
    }
    if let Some(secs) = read_setting::<u64>(kv, "settings.llm.rate_limit.window_secs") {
        config.llm.rate_limit.window = Duration::from_secs(secs);
    }
    if let Some(max) = read_setting::<usize>(kv, "settings.llm.rate_limit.max_requests") {
        config.llm.rate_limit.max_requests = max;
    }
    if let Some(url) = read_setting::<String>(kv, "settings.llm.gemini.base_url") {
        config.llm.gemini.base_url = url;
    }
    if let Some(models) = read_setting::<Vec<String>>(kv, "settings.llm.gemini.models") {
        config.llm.gemini.models = models;
    }
    if let Some(url) = read_setting::<String>(kv, "settings.llm.openai.base_url") {
        config.llm.openai.base_url = url;
    }
    if let Some(model) = read_setting::<String>(kv, "settings.llm.openai.model") {
        config.llm.openai.model = model;
    }
    if let Some(streaming) = read_setting::<bool>(kv, "settings.interaction.streaming") {
        config.interaction.streaming = streaming;
    }
    config
}

/// Values are stored as JSON; anything unreadable falls back to the default.
fn read_setting<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match kv.get(key) {
        Ok(value) => value?,
        Err(err) => {
            warn!("failed to read setting {key}: {err}");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("ignoring malformed setting {key}: {err}");
            None
        }
    }
}
