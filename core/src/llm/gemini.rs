//! Gemini `generateContent` / `streamGenerateContent` with an ordered model
//! fallback list.
//!
//! Every model failure (HTTP error, malformed body, no candidates, no text,
//! or a stream that ends empty) moves on to the next model. Only the last
//! failure is surfaced, wrapped in an exhaustion error.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, warn};
use reqwest::{Client, Response};
use serde_json::{json, Value};

use super::provider::ChatProvider;
use super::sse::SseLineBuffer;
use super::{ChatMessage, GenerationParams, OnChunk};
use crate::config::GeminiConfig;
use crate::errors::LlmError;
use crate::memory::Role;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    models: Vec<String>,
    params: GenerationParams,
}

impl GeminiProvider {
    pub fn new(client: Client, config: &GeminiConfig, params: GenerationParams) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            models: config.models.clone(),
            params,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post(&self, url: String, query: &[(&str, &str)], payload: &Value) -> Result<Response, LlmError> {
        let response = self
            .client
            .post(url)
            .query(query)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(LlmError::ProviderHttp {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response)
    }

    async fn generate(&self, model: &str, credential: &str, payload: &Value) -> Result<String, LlmError> {
        let response = self
            .post(
                self.endpoint(model, "generateContent"),
                &[("key", credential)],
                payload,
            )
            .await?;
        let body: Value = response.json().await?;
        extract_text(&body)
    }

    async fn generate_stream(
        &self,
        model: &str,
        credential: &str,
        payload: &Value,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String, LlmError> {
        let response = self
            .post(
                self.endpoint(model, "streamGenerateContent"),
                &[("alt", "sse"), ("key", credential)],
                payload,
            )
            .await?;

        let mut bytes = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut total = String::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for payload in lines.push(&chunk) {
                accumulate(&payload, &mut total, on_chunk);
            }
        }
        if let Some(payload) = lines.finish() {
            accumulate(&payload, &mut total, on_chunk);
        }

        if total.is_empty() {
            return Err(LlmError::MalformedResponse(
                "Gemini stream ended without text".into(),
            ));
        }
        Ok(total)
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn send(&self, credential: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let payload = build_request(messages, self.params);
        let mut last_err: Option<LlmError> = None;
        for model in &self.models {
            match self.generate(model, credential, &payload).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!("Gemini model {model} failed, trying next fallback: {err}");
                    last_err = Some(err);
                }
            }
        }
        let last = last_err.ok_or(LlmError::NoModelsConfigured)?;
        error!("All Gemini models failed: {last}");
        Err(LlmError::AllModelsExhausted {
            last: Box::new(last),
        })
    }

    async fn stream(
        &self,
        credential: &str,
        messages: &[ChatMessage],
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String, LlmError> {
        let payload = build_request(messages, self.params);
        let mut last_err: Option<LlmError> = None;
        for model in &self.models {
            match self
                .generate_stream(model, credential, &payload, on_chunk)
                .await
            {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!("Gemini stream on {model} failed, trying next fallback: {err}");
                    last_err = Some(err);
                }
            }
        }
        let last = last_err.ok_or(LlmError::NoModelsConfigured)?;
        error!("All Gemini streaming models failed: {last}");
        Err(LlmError::StreamExhausted {
            last: Box::new(last),
        })
    }
}

/// System turns go to `system_instruction`; the rest become `contents` with
/// `assistant` renamed to `model`.
pub fn build_request(messages: &[ChatMessage], params: GenerationParams) -> Value {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({
                "role": role,
                "parts": [{"text": m.content}],
            })
        })
        .collect();

    let mut payload = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": params.temperature,
            "maxOutputTokens": params.max_output_tokens,
        }
    });
    if !system.is_empty() {
        payload["system_instruction"] = json!({ "parts": [{"text": system}] });
    }
    payload
}

fn error_message(body: &Value) -> String {
    let err = body.get("error");
    err.and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| err.and_then(|e| e.get("status")).and_then(|s| s.as_str()))
        .unwrap_or("Unknown Gemini Error")
        .to_string()
}

/// `candidates[0].content.parts[..].text`, requiring at least one text part.
pub fn extract_text(body: &Value) -> Result<String, LlmError> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            LlmError::MalformedResponse("Gemini returned no candidates. Check safety settings.".into())
        })?;
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| LlmError::MalformedResponse("Gemini candidate missing content or parts.".into()))?;
    parts
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
        .ok_or_else(|| LlmError::MalformedResponse("Gemini candidate has no text part.".into()))
}

/// Text carried by one streamed fragment, concatenated across its parts.
fn fragment_text(fragment: &Value) -> String {
    fragment
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn accumulate(payload: &str, total: &mut String, on_chunk: &mut OnChunk<'_>) {
    let fragment: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            debug!("skipping unparseable stream line: {err}");
            return;
        }
    };
    let text = fragment_text(&fragment);
    if text.is_empty() {
        return;
    }
    total.push_str(&text);
    on_chunk(total);
}
