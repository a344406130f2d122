use thiserror::Error;

/// Failures raised by the LLM client and its providers.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API Key is missing.")]
    MissingCredential,
    #[error("Rate limit exceeded. Please wait a moment before trying again.")]
    RateLimitExceeded,
    #[error("{message}")]
    ProviderHttp { status: u16, message: String },
    #[error("{0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Transport(String),
    #[error("No models configured for provider")]
    NoModelsConfigured,
    #[error("Gemini API Error: {last}")]
    AllModelsExhausted { last: Box<LlmError> },
    #[error("Gemini streaming error: {last}")]
    StreamExhausted { last: Box<LlmError> },
}

impl LlmError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "LLM-1001",
            Self::RateLimitExceeded => "LLM-1002",
            Self::ProviderHttp { .. } => "LLM-2001",
            Self::MalformedResponse(_) => "LLM-2002",
            Self::Transport(_) => "LLM-2003",
            Self::NoModelsConfigured => "LLM-2004",
            Self::AllModelsExhausted { .. } => "LLM-3001",
            Self::StreamExhausted { .. } => "LLM-3002",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::MissingCredential => "No API key was supplied with the request.",
            Self::RateLimitExceeded => "Too many requests were issued inside the sliding window.",
            Self::ProviderHttp { .. } => "The provider answered with a non-success HTTP status.",
            Self::MalformedResponse(_) => "The provider response did not contain usable text.",
            Self::Transport(_) => "The request could not reach the provider.",
            Self::NoModelsConfigured => "The fallback model list is empty.",
            Self::AllModelsExhausted { .. } => "Every model in the fallback list failed.",
            Self::StreamExhausted { .. } => "Every model in the fallback list failed to stream text.",
        }
    }

    /// Innermost failure, unwrapping the exhaustion wrappers.
    pub fn root(&self) -> &LlmError {
        match self {
            Self::AllModelsExhausted { last } | Self::StreamExhausted { last } => last.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors may embed the request URL, which carries the gemini key.
        LlmError::Transport(err.without_url().to_string())
    }
}

/// Failures reported by the speech collaborators.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Speech recognition not supported in this environment. Type your message instead.")]
    Unsupported,
    #[error("Speech recognition failed: {0}")]
    CaptureFailed(String),
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),
}

impl SpeechError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unsupported => "SPK-1001",
            Self::CaptureFailed(_) => "SPK-1002",
            Self::SynthesisFailed(_) => "SPK-2001",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::Unsupported => "No capture device or recognizer is available.",
            Self::CaptureFailed(_) => "The capture session ended with an error.",
            Self::SynthesisFailed(_) => "Synthesis failed; the turn is treated as complete.",
        }
    }
}

/// Failures at the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("System messages are never persisted")]
    SystemRole,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "MEM-1001",
            Self::Serialize(_) => "MEM-1002",
            Self::SystemRole => "MEM-1003",
            Self::Io(_) => "MEM-1004",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "The backing key-value store could not be reached.",
            Self::Serialize(_) => "The conversation could not be encoded for storage.",
            Self::SystemRole => "Only user and assistant turns belong in the transcript.",
            Self::Io(_) => "Writing the exported transcript failed.",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Umbrella error surfaced to the presentation layer.
#[derive(Debug, Error)]
pub enum HerOsError {
    #[error("Please enter your API key in settings.")]
    ConfigurationMissing,
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HerOsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing => "CFG-1001",
            Self::Llm(err) => err.code(),
            Self::Speech(err) => err.code(),
            Self::Store(err) => err.code(),
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing => "An API key must be configured before talking.",
            Self::Llm(err) => err.explain(),
            Self::Speech(err) => err.explain(),
            Self::Store(err) => err.explain(),
        }
    }
}
