use std::sync::Arc;

use log::info;
use reqwest::Client;

use super::gemini::GeminiProvider;
use super::openai::OpenAiProvider;
use super::provider::{classify, ChatProvider, ProviderKind};
use super::rate_limit::{Clock, RateLimiter, SystemClock};
use super::{ChatMessage, GenerationParams, OnChunk};
use crate::config::LlmConfig;
use crate::errors::LlmError;

/// Entry point the orchestrator talks to. Owns the rate limiter and one
/// provider per [`ProviderKind`].
pub struct LlmClient {
    limiter: RateLimiter,
    gemini: Arc<dyn ChatProvider>,
    openai: Arc<dyn ChatProvider>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LlmConfig, clock: Arc<dyn Clock>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("HerOS-Core/0.1")
            .build()?;
        let params = GenerationParams {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        };
        Ok(Self::with_providers(
            RateLimiter::new(&config.rate_limit, clock),
            Arc::new(GeminiProvider::new(client.clone(), &config.gemini, params)),
            Arc::new(OpenAiProvider::new(client, &config.openai, params)),
        ))
    }

    pub fn with_providers(
        limiter: RateLimiter,
        gemini: Arc<dyn ChatProvider>,
        openai: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            limiter,
            gemini,
            openai,
        }
    }

    fn provider(&self, kind: ProviderKind) -> &dyn ChatProvider {
        match kind {
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::OpenAi => self.openai.as_ref(),
        }
    }

    fn prepare(&self, credential: &str) -> Result<ProviderKind, LlmError> {
        self.limiter.acquire()?;
        if credential.trim().is_empty() {
            return Err(LlmError::MissingCredential);
        }
        let kind = classify(credential);
        info!("dispatching chat request to {kind:?}");
        Ok(kind)
    }

    pub async fn send_message(
        &self,
        credential: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let kind = self.prepare(credential)?;
        self.provider(kind).send(credential, messages).await
    }

    /// Like [`send_message`](Self::send_message), reporting cumulative text
    /// through `on_chunk` as it arrives.
    pub async fn stream_message(
        &self,
        credential: &str,
        messages: &[ChatMessage],
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String, LlmError> {
        let kind = self.prepare(credential)?;
        self.provider(kind)
            .stream(credential, messages, on_chunk)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::llm::rate_limit::ManualClock;
    use crate::memory::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Echo {
        name: &'static str,
        calls: Mutex<Vec<String>>,
    }

    impl Echo {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for Echo {
        async fn send(&self, credential: &str, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(credential.to_string());
            Ok(self.name.to_string())
        }

        async fn stream(
            &self,
            credential: &str,
            messages: &[ChatMessage],
            on_chunk: &mut OnChunk<'_>,
        ) -> Result<String, LlmError> {
            let text = self.send(credential, messages).await?;
            on_chunk(&text);
            Ok(text)
        }
    }

    fn client(clock: Arc<ManualClock>, gemini: Arc<Echo>, openai: Arc<Echo>) -> LlmClient {
        LlmClient::with_providers(
            RateLimiter::new(&RateLimitConfig::default(), clock),
            gemini,
            openai,
        )
    }

    fn hello() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::User, "hello")]
    }

    #[tokio::test]
    async fn routes_by_credential_shape() {
        let (gemini, openai) = (Echo::new("gemini"), Echo::new("openai"));
        let client = client(Arc::new(ManualClock::new()), gemini.clone(), openai.clone());
        assert_eq!(client.send_message("AIzaSyXXXX", &hello()).await.unwrap(), "gemini");
        assert_eq!(client.send_message("sk-test", &hello()).await.unwrap(), "openai");
        assert_eq!(gemini.calls.lock().unwrap().len(), 1);
        assert_eq!(openai.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_credential_is_rejected_before_dispatch() {
        let (gemini, openai) = (Echo::new("gemini"), Echo::new("openai"));
        let client = client(Arc::new(ManualClock::new()), gemini.clone(), openai.clone());
        assert!(matches!(
            client.send_message("  ", &hello()).await,
            Err(LlmError::MissingCredential)
        ));
        assert!(openai.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_reports_text_through_the_callback() {
        let client = client(Arc::new(ManualClock::new()), Echo::new("gemini"), Echo::new("openai"));
        let mut seen: Vec<String> = Vec::new();
        let text = client
            .stream_message("sk-test", &hello(), &mut |chunk: &str| seen.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "openai");
        assert_eq!(seen, vec!["openai"]);
    }

    #[tokio::test]
    async fn rate_limit_applies_to_both_entry_points() {
        let clock = Arc::new(ManualClock::new());
        let client = client(clock.clone(), Echo::new("gemini"), Echo::new("openai"));
        for _ in 0..5 {
            client.send_message("sk-test", &hello()).await.unwrap();
            client
                .stream_message("sk-test", &hello(), &mut |_: &str| {})
                .await
                .unwrap();
        }
        assert!(matches!(
            client.send_message("sk-test", &hello()).await,
            Err(LlmError::RateLimitExceeded)
        ));
        clock.advance(Duration::from_secs(60));
        client.send_message("sk-test", &hello()).await.unwrap();
    }
}
