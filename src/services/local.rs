//! Local classifier backed by an Ollama-compatible endpoint
//!
//! The cheap tier: consulted only for automated-looking items. A missing
//! or unreachable endpoint is not an error condition; the fast tier is
//! simply skipped when no local model is configured.

use crate::config::LocalModelConfig;
use crate::error::{Result, ThemisError};
use crate::pipeline::prompt;
use crate::services::LocalModel;
use crate::types::Item;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ollama-backed local model
pub struct OllamaModel {
    config: LocalModelConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaModel {
    pub fn new(config: LocalModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn generate(&self, prompt_text: &str) -> Result<String> {
        debug!("Calling local model at {}", self.config.endpoint);

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        let request = GenerateRequest {
            model: &self.config.model,
            prompt: prompt_text,
            stream: false,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ThemisError::ModelApi(format!(
                "local model request failed with status {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ThemisError::ModelApi(format!("Failed to parse response: {}", e)))?;

        Ok(body.response)
    }
}

#[async_trait]
impl LocalModel for OllamaModel {
    async fn classify(&self, item: &Item, guidance: &[String]) -> Result<Option<String>> {
        Ok(Some(self.generate(&prompt::fast_classify_prompt(item, guidance)).await?))
    }
}
