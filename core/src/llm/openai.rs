use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde_json::Value;

use super::provider::ChatProvider;
use super::{ChatMessage, GenerationParams, OnChunk};
use crate::config::OpenAiConfig;
use crate::errors::LlmError;

const GENERIC_FAILURE: &str = "Failed to fetch response from OpenAI";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    params: GenerationParams,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: &OpenAiConfig, params: GenerationParams) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            params,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn send(&self, credential: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let payload = build_request(&self.model, messages, self.params);
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let err = LlmError::ProviderHttp {
                status: status.as_u16(),
                message: error_message(&body),
            };
            error!("OpenAI Error: {err}");
            return Err(err);
        }

        let body: Value = response.json().await?;
        extract_content(&body)
    }

    /// No incremental transport: the atomic response is delivered as one chunk.
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

fn build_request(model: &str, messages: &[ChatMessage], params: GenerationParams) -> Value {
    serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": params.temperature,
        "max_tokens": params.max_output_tokens,
    })
}

fn error_message(body: &Value) -> String {
    body.get("error")
        .and_then(|err| err.get("message"))
        .and_then(|msg| msg.as_str())
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}

fn extract_content(body: &Value) -> Result<String, LlmError> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|val| val.as_str())
        .map(|text| text.to_string())
        .ok_or_else(|| LlmError::MalformedResponse("OpenAI response missing message content".into()))
}
