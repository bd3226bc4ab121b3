//! Text generator clients.
//!
//! One HTTP request per [`Generator::complete`] call with the client
//! timeout from `[generator]`. Failures are returned as-is; callers decide
//! what a failure means (excerpt fallback while summarizing, generic
//! failure answer at query time).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::debug;

use sectioned_rag_core::generation::Generator;

use crate::config::GeneratorConfig;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Placeholder used when `generator.provider = "disabled"`. Every call fails.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Text generation is disabled. Set [generator] provider in config.")
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAIGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generator.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: build_client(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            model,
            api_key,
            temperature: config.temperature,
        })
    }
}

pub fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let json = checked_json(response, "OpenAI").await?;
        parse_chat_response(&json)
    }
}

/// Ollama `/api/generate` client (non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generator.model required for Ollama provider"))?;
        let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            client: build_client(config)?,
            endpoint: format!("{}/api/generate", url.trim_end_matches('/')),
            model,
            temperature: config.temperature,
        })
    }
}

pub fn parse_ollama_generate(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Ollama connection error (is Ollama running at {}?): {}", self.endpoint, e))?;
        let json = checked_json(response, "Ollama").await?;
        parse_ollama_generate(&json)
    }
}

fn build_client(config: &GeneratorConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

async fn checked_json(response: reqwest::Response, label: &str) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{label} API error {status}: {body_text}");
    }
    let json: serde_json::Value = response.json().await?;
    debug!(provider = label, "generation response received");
    Ok(json)
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_fails() {
        let generator = create_generator(&GeneratorConfig::default()).unwrap();
        let err = generator.complete("bonjour").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Le délai est de six mois.\n"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Le délai est de six mois.");
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_ollama_generate() {
        let json = serde_json::json!({"model": "mistral", "response": "Oui.", "done": true});
        assert_eq!(parse_ollama_generate(&json).unwrap(), "Oui.");
        assert!(parse_ollama_generate(&serde_json::json!({"done": true})).is_err());
    }

    #[test]
    fn test_ollama_endpoint_joins_url() {
        let config = GeneratorConfig {
            provider: "ollama".into(),
            model: Some("mistral".into()),
            url: Some("http://gpu-box:11434/".into()),
            ..GeneratorConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.endpoint, "http://gpu-box:11434/api/generate");
    }
}
