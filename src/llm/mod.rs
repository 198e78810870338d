//! LLM integration for reply classification.
//!
//! Supports:
//! - **Gemini**: `generateContent` over HTTPS
//! - **Anthropic**: Messages API over HTTPS
//!
//! Both sit behind the `LlmProvider` trait so the classifier never sees
//! provider details.

pub mod anthropic;
pub mod gemini;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use provider::*;

use std::sync::Arc;

use secrecy::SecretString;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Anthropic,
}

impl LlmBackend {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read provider settings from the environment.
    ///
    /// `GEMINI_API_KEY` wins over `ANTHROPIC_API_KEY`; `LLM_MODEL` overrides
    /// the backend's default model. Returns `None` when no key is set, in
    /// which case the classifier runs on keywords only.
    pub fn from_env() -> Option<Self> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let (backend, key) = if let Some(key) = non_empty("GEMINI_API_KEY") {
            (LlmBackend::Gemini, key)
        } else if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            (LlmBackend::Anthropic, key)
        } else {
            return None;
        };

        Some(Self {
            backend,
            api_key: SecretString::from(key),
            model: non_empty("LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Gemini => Arc::new(GeminiProvider::new(
            config.api_key.clone(),
            config.model.clone(),
        )?),
        LlmBackend::Anthropic => Arc::new(AnthropicProvider::new(
            config.api_key.clone(),
            config.model.clone(),
        )?),
    };
    tracing::info!(backend = ?config.backend, model = %config.model, "LLM provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_gemini_provider() {
        let config = LlmConfig {
            backend: LlmBackend::Gemini,
            api_key: SecretString::from("test-key"),
            model: "gemini-2.0-flash".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn create_anthropic_provider() {
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: SecretString::from("sk-test"),
            model: "claude-3-5-haiku-latest".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-3-5-haiku-latest");
    }
}
