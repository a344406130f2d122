//! Chat-completion client: provider selection, rate limiting, multi-model
//! fallback, and cumulative streaming over the gemini and openai wire formats.

pub mod client;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod rate_limit;
pub mod sse;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

pub use client::LlmClient;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::{classify, ChatProvider, ProviderKind};
pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};

/// Receives the cumulative text-so-far of a streamed reply.
pub type OnChunk<'a> = dyn for<'s> FnMut(&'s str) + Send + 'a;

/// Role-tagged turn as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// Sampling parameters shared by both providers.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 600,
        }
    }
}
