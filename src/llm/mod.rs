//! LLM client abstraction.
//!
//! Provides a unified interface over the LLM providers the enrichment
//! services call, plus the shared resilience layer (retry with backoff and
//! the process-wide circuit breaker).
//!
//! # Supported Providers
//!
//! | Provider | Client | Environment Variables |
//! |----------|--------|----------------------|
//! | Anthropic | [`AnthropicClient`] | `ANTHROPIC_API_KEY` |
//! | Ollama | [`OllamaClient`] | `OLLAMA_HOST`, `OLLAMA_MODEL` |
//!
//! # Usage
//!
//! ```rust,ignore
//! use ontoloom::llm::{LlmProvider, AnthropicClient, LlmRuntime, ResilienceConfig};
//! use std::sync::Arc;
//!
//! let client = Arc::new(AnthropicClient::new());
//! let runtime = LlmRuntime::new(client, ResilienceConfig::default());
//! let text = runtime.complete_guarded("You are terse.", "Say hi")?;
//! ```

mod anthropic;
mod ollama;
mod resilience;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use resilience::{CircuitBreaker, LlmRuntime, ResilienceConfig};

use crate::Result;
use std::time::Duration;

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on provider failure.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a separate system prompt.
    ///
    /// The default implementation concatenates the prompts.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on provider failure.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.complete(&format!("{system}\n\n{user}"))
    }
}

/// HTTP timeouts for LLM requests.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Total request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Builds a blocking HTTP client with the given timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .build()
        .unwrap_or_default()
}

/// Extracts a JSON payload from an LLM response that may be wrapped in
/// markdown fences or surrounding prose.
#[must_use]
pub fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let body_start = start + "```json".len();
        if let Some(end) = trimmed[body_start..].find("```") {
            return trimmed[body_start..body_start + end].trim().to_string();
        }
    }

    let object = trimmed.find('{').and_then(|start| {
        trimmed.rfind('}').and_then(|end| {
            (start < end).then(|| trimmed[start..=end].to_string())
        })
    });
    if let Some(json) = object {
        return json;
    }

    let array = trimmed.find('[').and_then(|start| {
        trimmed.rfind(']').and_then(|end| {
            (start < end).then(|| trimmed[start..=end].to_string())
        })
    });
    array.unwrap_or_else(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let json = r#"{"a": 1}"#;
        assert_eq!(extract_json(json), json);
    }

    #[test]
    fn test_extract_json_from_markdown() {
        let response = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(response), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let response = "The result is {\"a\": 1} as requested.";
        assert_eq!(extract_json(response), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_array() {
        let response = "Columns: [1, 2, 3]";
        assert_eq!(extract_json(response), "[1, 2, 3]");
    }

    struct EchoProvider;

    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn complete(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn test_default_complete_with_system_concatenates() {
        let provider = EchoProvider;
        let out = provider.complete_with_system("sys", "user").unwrap();
        assert_eq!(out, "sys\n\nuser");
    }
}
