use crate::config::{ProviderConfig, ProviderType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod retry;

/// Request timeout used when the provider table does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub default_model: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    fn is_authenticated(&self) -> bool;
}

pub fn create_provider(provider_type: ProviderType, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match provider_type {
        ProviderType::Anthropic => Ok(Arc::new(anthropic::AnthropicProvider::new(config)?)),
        ProviderType::Openai => Ok(Arc::new(openai::OpenAiProvider::new(openai::Flavor::OpenAi, config)?)),
        ProviderType::Azure => Ok(Arc::new(openai::OpenAiProvider::new(openai::Flavor::Azure, config)?)),
        ProviderType::Litellm => Ok(Arc::new(openai::OpenAiProvider::new(openai::Flavor::LiteLlm, config)?)),
        ProviderType::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(config)?)),
    }
}

pub(crate) fn http_client(config: &ProviderConfig) -> Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
