use crate::config::ProviderConfig;
use crate::error::{MendError, Result};
use crate::providers::{
    CompletionRequest, CompletionResponse, Message, Provider, ProviderInfo, Role, Usage, http_client,
    trim_base_url,
};
use async_trait::async_trait;
use reqwest::Client;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .as_deref()
                .map(trim_base_url)
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            client: http_client(config)?,
        })
    }

    pub fn static_info() -> ProviderInfo {
        ProviderInfo {
            name: "anthropic".to_string(),
            display_name: "Anthropic".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|msg| {
                serde_json::json!({
                    "role": match msg.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": msg.content
                })
            })
            .collect()
    }

    fn extract_system_message(messages: &[Message]) -> Option<String> {
        messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "temperature": request.temperature.unwrap_or(0.2),
        });

        if let Some(system) = Self::extract_system_message(&request.messages) {
            body["system"] = serde_json::json!(system);
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        Self::static_info()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            MendError::Authentication("Anthropic API key not configured".to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::build_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MendError::ApiRequest(format!(
                "Anthropic API error ({}): {}",
                status, error_text
            )));
        }

        let data: serde_json::Value = response.json().await?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = data.get("usage").map(|usage| {
            let input = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
            let output = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
            Usage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }
        });

        Ok(CompletionResponse {
            id: data["id"].as_str().unwrap_or("unknown").to_string(),
            model: data["model"].as_str().unwrap_or(&request.model).to_string(),
            content,
            finish_reason: data["stop_reason"].as_str().map(|s| s.to_string()),
            usage,
        })
    }

    fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }
}
