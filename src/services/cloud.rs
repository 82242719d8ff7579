//! Cloud classifier backed by the Anthropic Messages API
//!
//! The heavyweight tier: full item context, decision history, and guidance
//! rules go into the prompt; the raw text response comes back for the
//! pipeline to parse defensively. Every request carries an explicit timeout.

use crate::config::CloudModelConfig;
use crate::error::{Result, ThemisError};
use crate::pipeline::prompt;
use crate::services::{ClassifyContext, CloudModel};
use crate::types::Item;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Anthropic-backed cloud model
pub struct AnthropicModel {
    config: CloudModelConfig,
    api_key: String,
    client: reqwest::Client,
}

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

impl AnthropicModel {
    /// Create a new cloud model from config; the API key comes from
    /// `ANTHROPIC_API_KEY`.
    pub fn new(config: CloudModelConfig) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            return Err(ThemisError::Config(
                "ANTHROPIC_API_KEY not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Make an API call to Claude
    async fn call_api(&self, prompt_text: &str) -> Result<String> {
        debug!("Calling Anthropic API");

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt_text.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ThemisError::ModelApi(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ThemisError::ModelApi(format!("Failed to parse response: {}", e)))?;

        api_response
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| ThemisError::ModelApi("Empty response from API".to_string()))
    }
}

#[async_trait]
impl CloudModel for AnthropicModel {
    async fn classify(&self, item: &Item, context: &ClassifyContext) -> Result<Option<String>> {
        let prompt_text = prompt::cloud_classify_prompt(item, context);
        Ok(Some(self.call_api(&prompt_text).await?))
    }

    async fn complete(&self, prompt_text: &str) -> Result<Option<String>> {
        Ok(Some(self.call_api(prompt_text).await?))
    }
}
