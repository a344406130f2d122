use async_trait::async_trait;
use serde::Serialize;

use super::{ChatMessage, OnChunk};
use crate::errors::LlmError;

/// Backend chosen for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

/// Sniff the backend from the key shape: `AIza...` keys, or long keys that are
/// not `sk-...`, belong to gemini; everything else goes to openai.
///
/// Some valid key shapes are misclassified; the rule is kept as-is for
/// compatibility with keys users already have.
pub fn classify(credential: &str) -> ProviderKind {
    if credential.starts_with("AIza")
        || (credential.chars().count() > 30 && !credential.starts_with("sk-"))
    {
        ProviderKind::Gemini
    } else {
        ProviderKind::OpenAi
    }
}

/// Common capability every backend implements.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn send(&self, credential: &str, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Deliver the cumulative text-so-far through `on_chunk` after every
    /// fragment, then return the full text. Each callback replaces the
    /// previous one.
    async fn stream(
        &self,
        credential: &str,
        messages: &[ChatMessage],
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String, LlmError>;
}
