use crate::config::ProviderConfig;
use crate::error::{MendError, Result};
use crate::providers::{
    CompletionRequest, CompletionResponse, Provider, ProviderInfo, Usage, http_client, trim_base_url,
};
use async_trait::async_trait;
use reqwest::Client;

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

/// Local models served by Ollama's `/api/chat` endpoint.
pub struct OllamaProvider {
    host: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            host: config
                .base_url
                .as_deref()
                .map(trim_base_url)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
            display_name: "Ollama".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut options = serde_json::json!({});
        if let Some(temperature) = request.temperature {
            options["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }

        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": options,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MendError::ApiRequest(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let prompt_tokens = data["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = data["eval_count"].as_u64().unwrap_or(0) as u32;

        Ok(CompletionResponse {
            id: data["created_at"].as_str().unwrap_or("unknown").to_string(),
            model: data["model"].as_str().unwrap_or(&request.model).to_string(),
            content: data["message"]["content"].as_str().unwrap_or("").to_string(),
            finish_reason: data["done_reason"].as_str().map(|s| s.to_string()),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn is_authenticated(&self) -> bool {
        true
    }
}
