//! Providers speaking the OpenAI chat-completions protocol: OpenAI itself,
//! Azure OpenAI deployments and LiteLLM proxies.

use crate::config::ProviderConfig;
use crate::error::{MendError, Result};
use crate::providers::{
    CompletionRequest, CompletionResponse, Provider, ProviderInfo, Usage, http_client, trim_base_url,
};
use async_trait::async_trait;
use reqwest::Client;

const AZURE_DEFAULT_API_VERSION: &str = "2024-02-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    Azure,
    LiteLlm,
}

impl Flavor {
    fn name(&self) -> &'static str {
        match self {
            Flavor::OpenAi => "openai",
            Flavor::Azure => "azure",
            Flavor::LiteLlm => "litellm",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Flavor::OpenAi => "OpenAI",
            Flavor::Azure => "Azure OpenAI",
            Flavor::LiteLlm => "LiteLLM",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Flavor::OpenAi => "gpt-4o",
            Flavor::Azure => "gpt-4o-mini",
            Flavor::LiteLlm => "gpt-4",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Flavor::OpenAi => "https://api.openai.com/v1",
            Flavor::Azure => "",
            Flavor::LiteLlm => "http://localhost:4000",
        }
    }
}

pub struct OpenAiProvider {
    flavor: Flavor,
    api_key: Option<String>,
    base_url: String,
    deployment: Option<String>,
    api_version: String,
    organization: Option<String>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(flavor: Flavor, config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(trim_base_url)
            .unwrap_or_else(|| flavor.default_base_url().to_string());

        if flavor == Flavor::Azure && base_url.is_empty() {
            return Err(MendError::ProviderNotConfigured(
                "azure: base_url (resource endpoint) is required".to_string(),
            ));
        }

        Ok(Self {
            flavor,
            api_key: config.api_key.clone(),
            base_url,
            deployment: config.deployment.clone(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| AZURE_DEFAULT_API_VERSION.to_string()),
            organization: config.organization.clone(),
            client: http_client(config)?,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        match self.flavor {
            Flavor::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url,
                self.deployment.as_deref().unwrap_or(model),
                self.api_version
            ),
            Flavor::OpenAi | Flavor::LiteLlm => format!("{}/chat/completions", self.base_url),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.flavor.name().to_string(),
            display_name: self.flavor.display_name().to_string(),
            default_model: self.flavor.default_model().to_string(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        if !self.is_authenticated() {
            return Err(MendError::Authentication(format!(
                "{} API key not configured",
                self.flavor.display_name()
            )));
        }

        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(0.2),
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        let mut req = self
            .client
            .post(self.endpoint(&request.model))
            .header("Content-Type", "application/json");

        if let Some(key) = &self.api_key {
            req = match self.flavor {
                Flavor::Azure => req.header("api-key", key.as_str()),
                Flavor::OpenAi | Flavor::LiteLlm => req.header("Authorization", format!("Bearer {}", key)),
            };
        }
        if let Some(org) = &self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        let response = req.json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MendError::ApiRequest(format!(
                "{} API error ({}): {}",
                self.flavor.display_name(),
                status,
                error_text
            )));
        }

        let data: serde_json::Value = response.json().await?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = data.get("usage").map(|usage| Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(CompletionResponse {
            id: data["id"].as_str().unwrap_or("unknown").to_string(),
            model: data["model"].as_str().unwrap_or(&request.model).to_string(),
            content,
            finish_reason: data["choices"][0]["finish_reason"]
                .as_str()
                .map(|s| s.to_string()),
            usage,
        })
    }

    fn is_authenticated(&self) -> bool {
        // LiteLLM proxies are often run without a key.
        self.api_key.is_some() || self.flavor == Flavor::LiteLlm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_endpoint_uses_deployment_and_version() {
        let config = ProviderConfig {
            api_key: Some("k".to_string()),
            base_url: Some("https://res.openai.azure.com/".to_string()),
            deployment: Some("fixer".to_string()),
            api_version: Some("2024-06-01".to_string()),
            ..Default::default()
        };
        let provider = OpenAiProvider::new(Flavor::Azure, &config).unwrap();
        assert_eq!(
            provider.endpoint("ignored"),
            "https://res.openai.azure.com/openai/deployments/fixer/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_azure_requires_endpoint() {
        let config = ProviderConfig::default();
        assert!(OpenAiProvider::new(Flavor::Azure, &config).is_err());
    }

    #[test]
    fn test_openai_and_litellm_endpoints() {
        let openai = OpenAiProvider::new(Flavor::OpenAi, &ProviderConfig::default()).unwrap();
        assert_eq!(openai.endpoint("gpt-4o"), "https://api.openai.com/v1/chat/completions");
        assert!(!openai.is_authenticated());

        let litellm = OpenAiProvider::new(Flavor::LiteLlm, &ProviderConfig::default()).unwrap();
        assert_eq!(litellm.endpoint("gpt-4"), "http://localhost:4000/chat/completions");
        assert!(litellm.is_authenticated());
    }
}
