//! Ollama client for local models.

use super::{build_http_client, LlmHttpConfig, LlmProvider};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Ollama LLM client.
pub struct OllamaClient {
    /// Host URL.
    host: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default host.
    pub const DEFAULT_HOST: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a new Ollama client from the environment.
    #[must_use]
    pub fn new() -> Self {
        let host =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        Self {
            host,
            model,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the host URL.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    fn request(&self, system: Option<&str>, user: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: user.to_string(),
            system: system.map(String::from),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&request)
            .send()
            .map_err(Error::llm)?;

        if !response.status().is_success() {
            return Err(Error::llm(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        let response: GenerateResponse = response.json().map_err(Error::llm)?;
        Ok(response.response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(None, prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(Some(system), user)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let client = OllamaClient::new()
            .with_host("http://localhost:9999")
            .with_model("test-model");
        assert_eq!(client.host, "http://localhost:9999");
        assert_eq!(client.model, "test-model");
        assert_eq!(client.name(), "ollama");
    }
}
